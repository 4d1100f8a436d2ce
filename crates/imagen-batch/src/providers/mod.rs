//! Image generation providers
//!
//! 远程图像生成服务的具体实现

mod imagen;

pub use imagen::{
    mask_api_key, ImagenClient, ImagenConfig, ProviderError, API_KEY_ENV, DEFAULT_BASE_URL,
    DEFAULT_MODEL,
};

// Parallel Generation Module
//
// Bounded-concurrency worker pool driving one retrying task per prompt.

mod pool;


pub use pool::*;

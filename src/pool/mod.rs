mod pool;
mod queue;
mod supervisor;
mod worker;

pub use pool::Pool;

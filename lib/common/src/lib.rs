pub mod config;
pub mod task;

pub mod util {
    pub mod time;
    pub mod trace;
}

pub use config::*;
pub use task::*;

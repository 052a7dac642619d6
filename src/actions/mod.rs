mod config;
mod id_map;
mod serve;
mod start;
mod status;
mod stop;

pub use config::*;
pub use id_map::*;
pub use serve::*;
pub use start::*;
pub use status::*;
pub use stop::*;

mod devices;
mod id_map;
mod lxc_container;
mod runtime;

pub use devices::*;
pub use id_map::*;
pub use lxc_container::*;
pub use runtime::*;

mod credentials;
mod uid_gid_home;

pub use credentials::*;
pub use uid_gid_home::*;

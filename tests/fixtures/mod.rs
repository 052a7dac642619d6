mod fixture_bridge;
mod fixture_guestbox;

#[allow(unused_imports)]
pub use fixture_bridge::*;
#[allow(unused_imports)]
pub use fixture_guestbox::*;

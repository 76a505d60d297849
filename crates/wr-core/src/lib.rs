pub mod error;
pub mod interface;
pub mod ip;
pub mod layout;
pub mod network;
pub mod route;

pub use error::*;
pub use interface::*;
pub use ip::*;
pub use layout::*;
pub use network::Network;
pub use network::NsInfo;
pub use route::*;

// Layout model and validation for machine network interface topologies

pub(crate) fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

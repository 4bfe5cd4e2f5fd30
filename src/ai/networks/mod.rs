mod policy_value_network;

pub use policy_value_network::{PolicyValueNetwork, PolicyValueNetworkConfig};

#![no_std]

#[cfg(test)]
extern crate std;

pub mod arp;
pub mod checksum;
pub mod config;
pub mod ethernet;
pub mod frame;
pub mod icmp;
pub mod ingress;
pub mod ipv4;
pub mod mqtt;
pub mod netdev;
pub mod netstack;
pub mod notice;
pub mod pending;
pub mod random;
pub mod socket;
pub mod tcp;
pub mod timer;
pub mod types;
pub mod udp;

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod tcp_tests;

pub use config::{ConfigKey, ConfigStore, MqttOptions, NetConfig};
pub use netdev::{Application, Entropy, NetDevice, NetStats};
pub use netstack::{NetStack, StatusSnapshot};
pub use notice::Notice;
pub use socket::SocketHandle;
pub use types::{Ipv4Addr, MacAddr, NetError, Port, SockAddr};

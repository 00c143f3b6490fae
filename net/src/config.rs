//! Interface addressing and MQTT client options.
//!
//! Addresses persist in a word-addressed store, one 32-bit word per slot. A
//! slot reading [`ERASED`] has never been written and keeps its default.

use core::fmt;

use heapless::{String, Vec};

use crate::mqtt::packet::{ConnectOptions, QoS, Will};
use crate::mqtt::topics::{TopicName, topic_name};
use crate::types::{Ipv4Addr, MacAddr, NetError};

/// Value of a never-written store word.
pub const ERASED: u32 = 0xFFFF_FFFF;

/// Persistent storage of 32-bit configuration words.
pub trait ConfigStore {
    fn read_word(&mut self, key: ConfigKey) -> u32;
    fn write_word(&mut self, key: ConfigKey, value: u32);
}

/// Store slot of each persisted setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ConfigKey {
    Dhcp = 1,
    Ip = 2,
    SubnetMask = 3,
    Gateway = 4,
    Dns = 5,
    TimeServer = 6,
    MqttBroker = 7,
}

impl ConfigKey {
    pub const ADDRESSES: [ConfigKey; 6] = [
        Self::Ip,
        Self::SubnetMask,
        Self::Gateway,
        Self::Dns,
        Self::TimeServer,
        Self::MqttBroker,
    ];

    #[inline]
    pub const fn slot(self) -> u16 {
        self as u16
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Dhcp => "dhcp",
            Self::Ip => "ip",
            Self::SubnetMask => "sn",
            Self::Gateway => "gw",
            Self::Dns => "dns",
            Self::TimeServer => "time",
            Self::MqttBroker => "mqtt",
        }
    }
}

/// Octets in memory order, read as a little-endian word.
#[inline]
const fn address_to_word(addr: Ipv4Addr) -> u32 {
    u32::from_le_bytes(addr.0)
}

#[inline]
const fn word_to_address(word: u32) -> Ipv4Addr {
    Ipv4Addr(word.to_le_bytes())
}

/// Addressing of the single interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetConfig {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub time_server: Ipv4Addr,
    pub mqtt_broker: Ipv4Addr,
    /// Persisted DHCP mode bit. There is no DHCP client; the address above
    /// is used as is.
    pub dhcp: bool,
}

impl NetConfig {
    pub const fn new(mac: MacAddr, ip: Ipv4Addr, subnet_mask: Ipv4Addr) -> Self {
        Self {
            mac,
            ip,
            subnet_mask,
            gateway: Ipv4Addr::UNSPECIFIED,
            dns: Ipv4Addr::UNSPECIFIED,
            time_server: Ipv4Addr::UNSPECIFIED,
            mqtt_broker: Ipv4Addr::UNSPECIFIED,
            dhcp: false,
        }
    }

    /// Overlay every written slot of `store` onto `defaults`.
    pub fn load(store: &mut impl ConfigStore, defaults: NetConfig) -> Self {
        let mut config = defaults;
        for key in ConfigKey::ADDRESSES {
            let word = store.read_word(key);
            if word != ERASED
                && let Some(field) = config.field_mut(key)
            {
                *field = word_to_address(word);
            }
        }
        let dhcp = store.read_word(ConfigKey::Dhcp);
        if dhcp != ERASED {
            config.dhcp = dhcp != 0;
        }
        config
    }

    /// Write every slot back.
    pub fn store(&self, store: &mut impl ConfigStore) {
        for key in ConfigKey::ADDRESSES {
            if let Some(addr) = self.address(key) {
                store.write_word(key, address_to_word(addr));
            }
        }
        store.write_word(ConfigKey::Dhcp, self.dhcp as u32);
    }

    /// Address held in `key`'s slot. `None` for [`ConfigKey::Dhcp`].
    pub fn address(&self, key: ConfigKey) -> Option<Ipv4Addr> {
        match key {
            ConfigKey::Ip => Some(self.ip),
            ConfigKey::SubnetMask => Some(self.subnet_mask),
            ConfigKey::Gateway => Some(self.gateway),
            ConfigKey::Dns => Some(self.dns),
            ConfigKey::TimeServer => Some(self.time_server),
            ConfigKey::MqttBroker => Some(self.mqtt_broker),
            ConfigKey::Dhcp => None,
        }
    }

    fn field_mut(&mut self, key: ConfigKey) -> Option<&mut Ipv4Addr> {
        match key {
            ConfigKey::Ip => Some(&mut self.ip),
            ConfigKey::SubnetMask => Some(&mut self.subnet_mask),
            ConfigKey::Gateway => Some(&mut self.gateway),
            ConfigKey::Dns => Some(&mut self.dns),
            ConfigKey::TimeServer => Some(&mut self.time_server),
            ConfigKey::MqttBroker => Some(&mut self.mqtt_broker),
            ConfigKey::Dhcp => None,
        }
    }

    /// Change one address, persisting it when a store is given.
    pub fn set_address(
        &mut self,
        key: ConfigKey,
        addr: Ipv4Addr,
        store: Option<&mut dyn ConfigStore>,
    ) -> Result<(), NetError> {
        let field = self.field_mut(key).ok_or(NetError::InvalidArgument)?;
        *field = addr;
        if let Some(store) = store {
            store.write_word(key, address_to_word(addr));
        }
        Ok(())
    }

    #[inline]
    pub fn broadcast(&self) -> Ipv4Addr {
        let addr = self.ip.to_u32_be();
        let mask = self.subnet_mask.to_u32_be();
        Ipv4Addr::from_u32_be(addr | !mask)
    }

    #[inline]
    pub fn is_local(&self, ip: Ipv4Addr) -> bool {
        Ipv4Addr::in_subnet(ip, self.ip, self.subnet_mask)
    }

    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.subnet_mask.to_u32_be().leading_ones() as u8
    }
}

impl fmt::Display for NetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  HW:    {}", self.mac)?;
        writeln!(
            f,
            "  IP:    {}/{} ({})",
            self.ip,
            self.prefix_len(),
            if self.dhcp { "dhcp" } else { "static" }
        )?;
        writeln!(f, "  SN:    {}", self.subnet_mask)?;
        writeln!(f, "  GW:    {}", self.gateway)?;
        writeln!(f, "  DNS:   {}", self.dns)?;
        writeln!(f, "  TIME:  {}", self.time_server)?;
        write!(f, "  MQTT:  {}", self.mqtt_broker)
    }
}

// =============================================================================
// MQTT options
// =============================================================================

/// MQTT 3.1.1 servers must accept client ids of up to 23 bytes.
pub const MAX_CLIENT_ID_LEN: usize = 23;
pub const MAX_CREDENTIAL_LEN: usize = 32;
pub const MAX_WILL_MESSAGE_LEN: usize = 64;

pub const DEFAULT_CLIENT_ID: &str = "ethmq";
/// Keep-alive the firmware always sent; effectively disables PINGREQ.
pub const DEFAULT_KEEP_ALIVE: u16 = 0xFFFF;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WillOptions {
    pub topic: TopicName,
    pub message: Vec<u8, MAX_WILL_MESSAGE_LEN>,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttOptions {
    client_id: String<MAX_CLIENT_ID_LEN>,
    clean_session: bool,
    keep_alive: u16,
    will: Option<WillOptions>,
    username: Option<String<MAX_CREDENTIAL_LEN>>,
    password: Option<Vec<u8, MAX_CREDENTIAL_LEN>>,
    subscribe_qos: QoS,
}

impl Default for MqttOptions {
    fn default() -> Self {
        let mut client_id = String::new();
        let _ = client_id.push_str(DEFAULT_CLIENT_ID);
        Self {
            client_id,
            clean_session: true,
            keep_alive: DEFAULT_KEEP_ALIVE,
            will: None,
            username: None,
            password: None,
            subscribe_qos: QoS::AtMostOnce,
        }
    }
}

fn bounded<const N: usize>(text: &str) -> Result<String<N>, NetError> {
    let mut out = String::new();
    out.push_str(text).map_err(|_| NetError::InvalidArgument)?;
    Ok(out)
}

fn bounded_bytes<const N: usize>(bytes: &[u8]) -> Result<Vec<u8, N>, NetError> {
    Vec::from_slice(bytes).map_err(|_| NetError::InvalidArgument)
}

impl MqttOptions {
    pub fn new(client_id: &str) -> Result<Self, NetError> {
        let mut opts = Self::default();
        opts.set_client_id(client_id)?;
        Ok(opts)
    }

    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, NetError> {
        self.client_id = bounded(client_id)?;
        Ok(self)
    }

    pub fn set_clean_session(&mut self, clean: bool) -> &mut Self {
        self.clean_session = clean;
        self
    }

    pub fn set_keep_alive(&mut self, seconds: u16) -> &mut Self {
        self.keep_alive = seconds;
        self
    }

    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, NetError> {
        self.will = Some(WillOptions {
            topic: topic_name(topic).map_err(|_| NetError::InvalidArgument)?,
            message: bounded_bytes(message)?,
            qos,
            retain,
        });
        Ok(self)
    }

    pub fn clear_will(&mut self) -> &mut Self {
        self.will = None;
        self
    }

    /// A password is only sent together with a username.
    pub fn set_credentials(
        &mut self,
        username: &str,
        password: Option<&[u8]>,
    ) -> Result<&mut Self, NetError> {
        let username = bounded(username)?;
        let password = password.map(bounded_bytes).transpose()?;
        self.username = Some(username);
        self.password = password;
        Ok(self)
    }

    pub fn clear_credentials(&mut self) -> &mut Self {
        self.username = None;
        self.password = None;
        self
    }

    pub fn set_subscribe_qos(&mut self, qos: QoS) -> &mut Self {
        self.subscribe_qos = qos;
        self
    }

    #[inline]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[inline]
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[inline]
    pub fn subscribe_qos(&self) -> QoS {
        self.subscribe_qos
    }

    /// Time without outbound traffic after which a PINGREQ is due: half the
    /// keep-alive. `None` when 0 or 0xFFFF disables keep-alive.
    pub fn ping_interval_ms(&self) -> Option<u64> {
        match self.keep_alive {
            0 | DEFAULT_KEEP_ALIVE => None,
            secs => Some(secs as u64 * 500),
        }
    }

    pub fn connect_options(&self) -> ConnectOptions<'_> {
        ConnectOptions {
            client_id: &self.client_id,
            clean_session: self.clean_session,
            keep_alive: self.keep_alive,
            will: self.will.as_ref().map(|w| Will {
                topic: &w.topic,
                message: &w.message,
                qos: w.qos,
                retain: w.retain,
            }),
            username: self.username.as_deref(),
            password: self.password.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WordStore([u32; 8]);

    impl ConfigStore for WordStore {
        fn read_word(&mut self, key: ConfigKey) -> u32 {
            self.0[key.slot() as usize]
        }

        fn write_word(&mut self, key: ConfigKey, value: u32) {
            self.0[key.slot() as usize] = value;
        }
    }

    fn defaults() -> NetConfig {
        NetConfig::new(
            MacAddr([2, 3, 4, 5, 6, 141]),
            Ipv4Addr::new(192, 168, 1, 141),
            Ipv4Addr::new(255, 255, 255, 0),
        )
    }

    #[test]
    fn erased_slots_keep_defaults() {
        let mut store = WordStore([ERASED; 8]);
        store.0[ConfigKey::MqttBroker.slot() as usize] = u32::from_le_bytes([192, 168, 1, 1]);
        let config = NetConfig::load(&mut store, defaults());
        assert_eq!(config.ip, Ipv4Addr::new(192, 168, 1, 141));
        assert_eq!(config.mqtt_broker, Ipv4Addr::new(192, 168, 1, 1));
        assert!(!config.dhcp);
    }

    #[test]
    fn store_then_load() {
        let mut store = WordStore([ERASED; 8]);
        let mut config = defaults();
        config
            .set_address(ConfigKey::Gateway, Ipv4Addr::new(192, 168, 1, 254), Some(&mut store))
            .unwrap();
        assert_eq!(store.0[4], u32::from_le_bytes([192, 168, 1, 254]));
        config.store(&mut store);
        // The hardware address is not a stored slot.
        let blank = NetConfig::new(config.mac, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
        let reloaded = NetConfig::load(&mut store, blank);
        assert_eq!(reloaded, config);
        assert_eq!(
            config.set_address(ConfigKey::Dhcp, Ipv4Addr::UNSPECIFIED, None),
            Err(NetError::InvalidArgument)
        );
    }

    #[test]
    fn dhcp_slot_has_no_address() {
        let mut config = defaults();
        assert_eq!(config.address(ConfigKey::Dhcp), None);
        assert_eq!(config.address(ConfigKey::Ip), Some(Ipv4Addr::new(192, 168, 1, 141)));

        let mut store = WordStore([ERASED; 8]);
        config.dhcp = true;
        config.store(&mut store);
        assert_eq!(store.0[ConfigKey::Dhcp.slot() as usize], 1);
        let reloaded = NetConfig::load(&mut store, defaults());
        assert!(reloaded.dhcp);
        assert_eq!(reloaded.ip, config.ip);
    }

    #[test]
    fn subnet_helpers() {
        let config = defaults();
        assert_eq!(config.broadcast(), Ipv4Addr::new(192, 168, 1, 255));
        assert!(config.is_local(Ipv4Addr::new(192, 168, 1, 10)));
        assert!(!config.is_local(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(config.prefix_len(), 24);
    }

    #[test]
    fn mqtt_option_limits() {
        let mut opts = MqttOptions::default();
        assert_eq!(opts.ping_interval_ms(), None);
        opts.set_keep_alive(60);
        assert_eq!(opts.ping_interval_ms(), Some(30_000));
        assert!(opts.set_client_id("abcdefghijklmnopqrstuvwxyz").is_err());
        assert_eq!(opts.client_id(), DEFAULT_CLIENT_ID);

        opts.set_credentials("user", Some(b"pw")).unwrap();
        let connect = opts.connect_options();
        assert_eq!(connect.username, Some("user"));
        assert_eq!(connect.password, Some(&b"pw"[..]));
    }
}

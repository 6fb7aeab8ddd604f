use cinder::settings::Settings;

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_IPV4: &str = "127.0.0.1";
pub const DEFAULT_IPV6: &str = "::1";
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_CYCLE_LIMIT: u64 = 120;

/// Runtime configuration for the whole server, resolved once at startup
/// from the settings file plus defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// IPv4 bind address; `None` disables the IPv4 listener.
    pub ipv4: Option<String>,
    /// IPv6 bind address; `None` disables the IPv6 listener.
    pub ipv6: Option<String>,
    pub max_connections: usize,
    /// Fail instead of falling back to the unspecified address when the
    /// configured bind address does not resolve.
    pub strict_bind: bool,
    pub use_dns_lookup: bool,
    /// Directory holding the zone files; `None` boots an empty world.
    pub world_path: Option<String>,
    /// Number of game cycles before an automatic shutdown; `None` runs
    /// until interrupted.
    pub cycle_limit: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            port: DEFAULT_PORT,
            ipv4: Some(DEFAULT_IPV4.to_owned()),
            ipv6: Some(DEFAULT_IPV6.to_owned()),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            strict_bind: false,
            use_dns_lookup: false,
            world_path: None,
            cycle_limit: Some(DEFAULT_CYCLE_LIMIT),
        }
    }
}

impl ServerConfig {
    /// Builds the configuration from a settings store. Absent keys keep
    /// their defaults; `none` disables an address family.
    pub fn from_settings(settings: &Settings) -> ServerConfig {
        let mut config = ServerConfig::default();

        if let Some(port) = settings.get_number("server.network.port") {
            config.port = port as u16;
        }

        config.ipv4 = resolve_address(settings, "server.network.ipv4", config.ipv4);
        config.ipv6 = resolve_address(settings, "server.network.ipv6", config.ipv6);

        if let Some(max) = settings.get_number("server.network.max_connections") {
            config.max_connections = max as usize;
        }

        config.strict_bind = settings.is_enabled("server.network.strict_bind");
        config.use_dns_lookup = settings.is_enabled("server.network.dns_lookup");

        if let Some(path) = settings.get("server.game.world") {
            config.world_path = Some(path.to_owned());
        }

        if let Some(limit) = settings.get_number("server.game.cycle_limit") {
            config.cycle_limit = if limit > 0 { Some(limit as u64) } else { None };
        }

        config
    }
}

fn resolve_address(settings: &Settings, key: &str, default: Option<String>) -> Option<String> {
    match settings.get(key) {
        Some("none") => None,
        Some(addr) => Some(addr.to_owned()),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(contents: &str) -> Settings {
        let mut settings = Settings::new(None);
        settings.parse(contents);
        settings
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.port, 4000);
        assert_eq!(config.ipv4.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.ipv6.as_deref(), Some("::1"));
        assert_eq!(config.max_connections, 256);
        assert!(!config.strict_bind);
        assert!(!config.use_dns_lookup);
        assert_eq!(config.world_path, None);
        assert_eq!(config.cycle_limit, Some(120));
    }

    #[test]
    fn test_from_settings_overrides() {
        let config = ServerConfig::from_settings(&settings(
            "server.network.port = 5000\n\
             server.network.ipv4 = 0.0.0.0\n\
             server.network.ipv6 = none\n\
             server.network.max_connections = 64\n\
             server.network.strict_bind = yes\n\
             server.game.world = ./data/world\n\
             server.game.cycle_limit = 0\n",
        ));

        assert_eq!(config.port, 5000);
        assert_eq!(config.ipv4.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.ipv6, None);
        assert_eq!(config.max_connections, 64);
        assert!(config.strict_bind);
        assert_eq!(config.world_path.as_deref(), Some("./data/world"));
        assert_eq!(config.cycle_limit, None);
    }

    #[test]
    fn test_from_settings_keeps_defaults() {
        let config = ServerConfig::from_settings(&settings(""));

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.ipv4.as_deref(), Some(DEFAULT_IPV4));
        assert_eq!(config.cycle_limit, Some(DEFAULT_CYCLE_LIMIT));
    }
}

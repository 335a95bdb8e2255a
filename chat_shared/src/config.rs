//! Startup argument parsing (§6).
//!
//! There is no config file and no environment surface (§6
//! "Environment / persistence: None"); the equivalent of a config type
//! here is `ServerConfig`/`ClientConfig`, built directly from
//! `std::env::args()` by [`ServerConfig::parse`]/[`ClientConfig::parse`].
//! Validation failures return `Err` with the exact diagnostic text §6/§7
//! require; `main` prints it to stderr and exits non-zero.

use std::net::Ipv4Addr;
use std::str::FromStr;

pub const MIN_PORT: u16 = 1024;
pub const MAX_PORT: u16 = 65535;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub name: String,
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    pub client_port: u16,
}

fn parse_port(s: &str) -> Result<u16, String> {
    let port: u16 = s
        .parse()
        .map_err(|_| format!("invalid port `{s}`: must be an integer in [{MIN_PORT}, {MAX_PORT}]"))?;
    if port < MIN_PORT {
        return Err(format!(
            "invalid port `{s}`: must be in [{MIN_PORT}, {MAX_PORT}]"
        ));
    }
    Ok(port)
}

impl ServerConfig {
    /// Parses `<prog> -s <port>` (§6). `args` excludes the program name.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        match args {
            [flag] if flag == "-s" => Err("`-s` only accepts <port>".to_string()),
            [flag, port] if flag == "-s" => Ok(ServerConfig {
                port: parse_port(port)?,
            }),
            [] => Err("usage: <prog> -s <port>".to_string()),
            _ => Err(format!("usage: <prog> -s <port>, got `{}`", args.join(" "))),
        }
    }
}

impl ClientConfig {
    /// Parses `<prog> -c <name> <server-ip> <server-port> <client-port>`
    /// (§6). `args` excludes the program name.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        match args {
            [flag] if flag == "-c" => {
                Err("`-c` only accepts <name> <server-ip> <server-port> <client-port>".to_string())
            }
            [flag, name, ip, server_port, client_port] if flag == "-c" => {
                let server_ip = Ipv4Addr::from_str(ip)
                    .map_err(|_| format!("invalid IPv4 address `{ip}`"))?;
                Ok(ClientConfig {
                    name: name.clone(),
                    server_ip,
                    server_port: parse_port(server_port)?,
                    client_port: parse_port(client_port)?,
                })
            }
            [] => Err(
                "usage: <prog> -c <name> <server-ip> <server-port> <client-port>".to_string(),
            ),
            _ => Err(format!(
                "usage: <prog> -c <name> <server-ip> <server-port> <client-port>, got `{}`",
                args.join(" ")
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn server_parses_valid_port() {
        let cfg = ServerConfig::parse(&args(&["-s", "5000"])).unwrap();
        assert_eq!(cfg.port, 5000);
    }

    #[test]
    fn server_rejects_port_below_range() {
        assert!(ServerConfig::parse(&args(&["-s", "80"])).is_err());
    }

    #[test]
    fn server_missing_value_gives_exact_diagnostic() {
        let err = ServerConfig::parse(&args(&["-s"])).unwrap_err();
        assert_eq!(err, "`-s` only accepts <port>");
    }

    #[test]
    fn client_parses_valid_invocation() {
        let cfg =
            ClientConfig::parse(&args(&["-c", "c1", "127.0.0.1", "5000", "5555"])).unwrap();
        assert_eq!(cfg.name, "c1");
        assert_eq!(cfg.server_ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(cfg.server_port, 5000);
        assert_eq!(cfg.client_port, 5555);
    }

    #[test]
    fn client_rejects_non_dotted_decimal_ip() {
        assert!(ClientConfig::parse(&args(&["-c", "c1", "not-an-ip", "5000", "5555"])).is_err());
    }

    #[test]
    fn client_missing_values_gives_exact_diagnostic() {
        let err = ClientConfig::parse(&args(&["-c"])).unwrap_err();
        assert_eq!(
            err,
            "`-c` only accepts <name> <server-ip> <server-port> <client-port>"
        );
    }
}

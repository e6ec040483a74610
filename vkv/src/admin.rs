// Connection-hygiene and introspection commands (SPEC_FULL.md §2.2):
// `HELLO`/`SELECT`/`COMMAND`/`INFO`, `CONFIG GET`/`SET`, and a
// `DEBUG LATENCY` hook into the monitor's histograms. These sit above
// `vkv_resp::Dispatcher` rather than inside it, since they concern
// server-wide state (config, monitor) rather than the store.

use tokio::sync::RwLock;

use vkv_monitor::Monitor;
use vkv_resp::{CommandHandler, Frame};

use crate::config::ServerConfig;

pub struct AdminCommands<H> {
    inner: H,
    config: RwLock<ServerConfig>,
    monitor: std::sync::Arc<Monitor>,
}

impl<H: CommandHandler> AdminCommands<H> {
    pub fn new(inner: H, config: ServerConfig, monitor: std::sync::Arc<Monitor>) -> Self {
        AdminCommands { inner, config: RwLock::new(config), monitor }
    }

    async fn cmd_hello(&self) -> Frame {
        Frame::array(vec![
            Frame::bulk(b"server".to_vec()),
            Frame::bulk(b"vkv".to_vec()),
            Frame::bulk(b"proto".to_vec()),
            Frame::Integer(2),
            Frame::bulk(b"mode".to_vec()),
            Frame::bulk(if self.config.read().await.cluster_enabled { b"cluster".to_vec() } else { b"standalone".to_vec() }),
        ])
    }

    async fn cmd_select(&self, args: &[Vec<u8>]) -> Frame {
        match args.first().and_then(|b| std::str::from_utf8(b).ok()).and_then(|s| s.parse::<i64>().ok()) {
            Some(0) => Frame::simple("OK"),
            Some(_) => Frame::error("ERR DB index is out of range"),
            None => Frame::error("ERR value is not an integer or out of range"),
        }
    }

    async fn cmd_info(&self) -> Frame {
        let config = self.config.read().await;
        let totals = self.monitor.global_totals();
        let body = format!(
            "# Server\r\nvkv_mode:{}\r\n# Stats\r\ntotal_commands_processed:{}\r\ntotal_net_input_bytes:{}\r\ntotal_net_output_bytes:{}\r\n# Cluster\r\ncluster_enabled:{}\r\n",
            if config.cluster_enabled { "cluster" } else { "standalone" },
            totals.commands,
            totals.bytes_in,
            totals.bytes_out,
            config.cluster_enabled as u8,
        );
        Frame::bulk(body.into_bytes())
    }

    async fn cmd_command(&self) -> Frame {
        Frame::array(vec![])
    }

    async fn cmd_config(&self, args: &[Vec<u8>]) -> Frame {
        let Some(sub) = args.first().map(|b| String::from_utf8_lossy(b).to_ascii_uppercase()) else {
            return Frame::error("ERR wrong number of arguments for 'config' command");
        };
        match sub.as_str() {
            "GET" => {
                let Some(name) = args.get(1) else {
                    return Frame::error("ERR wrong number of arguments for 'config|get' command");
                };
                let config = self.config.read().await;
                match self.get_knob(&config, &String::from_utf8_lossy(name)) {
                    Some(value) => Frame::array(vec![Frame::bulk(name.clone()), Frame::bulk(value.into_bytes())]),
                    None => Frame::Array(Some(vec![])),
                }
            }
            "SET" => {
                let (Some(name), Some(value)) = (args.get(1), args.get(2)) else {
                    return Frame::error("ERR wrong number of arguments for 'config|set' command");
                };
                let mut config = self.config.write().await;
                match self.set_knob(&mut config, &String::from_utf8_lossy(name), &String::from_utf8_lossy(value)) {
                    Ok(()) => Frame::simple("OK"),
                    Err(e) => Frame::error(e),
                }
            }
            other => Frame::error(format!("ERR CONFIG subcommand '{other}' not supported")),
        }
    }

    fn get_knob(&self, config: &ServerConfig, name: &str) -> Option<String> {
        match name.to_ascii_lowercase().as_str() {
            "sampling_frequency" => Some(config.sampling_frequency_secs.to_string()),
            "gossip_delay" => Some(config.gossip_delay_secs.to_string()),
            "latency_monitor" => Some(config.latency_monitor.to_string()),
            "aof_enabled" => Some(config.aof_enabled.to_string()),
            "cluster_enabled" => Some(config.cluster_enabled.to_string()),
            "bind_address" => Some(config.bind_address.clone()),
            _ => None,
        }
    }

    fn set_knob(&self, config: &mut ServerConfig, name: &str, value: &str) -> Result<(), String> {
        match name.to_ascii_lowercase().as_str() {
            "sampling_frequency" => {
                config.sampling_frequency_secs = value.parse().map_err(|_| "ERR invalid value".to_string())?;
            }
            "gossip_delay" => {
                config.gossip_delay_secs = value.parse().map_err(|_| "ERR invalid value".to_string())?;
            }
            "latency_monitor" => {
                config.latency_monitor = value.parse().map_err(|_| "ERR invalid value".to_string())?;
            }
            other => return Err(format!("ERR unknown or read-only config parameter '{other}'")),
        }
        Ok(())
    }

    async fn cmd_debug(&self, args: &[Vec<u8>]) -> Frame {
        let Some(sub) = args.first().map(|b| String::from_utf8_lossy(b).to_ascii_uppercase()) else {
            return Frame::error("ERR wrong number of arguments for 'debug' command");
        };
        match sub.as_str() {
            "LATENCY" => {
                let Some(cmd) = args.get(1) else {
                    return Frame::error("ERR wrong number of arguments for 'debug|latency' command");
                };
                match self.monitor.latency_stats(&String::from_utf8_lossy(cmd)) {
                    Some(stats) => Frame::array(vec![
                        Frame::Integer(stats.count as i64),
                        Frame::Integer(stats.min_micros as i64),
                        Frame::Integer(stats.mean_micros as i64),
                        Frame::Integer(stats.p99_micros as i64),
                        Frame::Integer(stats.max_micros as i64),
                    ]),
                    None => Frame::Array(None),
                }
            }
            other => Frame::error(format!("ERR DEBUG subcommand '{other}' not supported")),
        }
    }
}

const ADMIN_COMMANDS: &[&str] = &["HELLO", "SELECT", "INFO", "COMMAND", "CONFIG", "DEBUG"];

#[async_trait::async_trait]
impl<H: CommandHandler> CommandHandler for AdminCommands<H> {
    async fn call(&self, cmd: &str, args: &[Vec<u8>]) -> Frame {
        let upper = cmd.to_ascii_uppercase();
        if !ADMIN_COMMANDS.contains(&upper.as_str()) {
            return self.inner.call(cmd, args).await;
        }
        let started = std::time::Instant::now();
        let response = match upper.as_str() {
            "HELLO" => self.cmd_hello().await,
            "SELECT" => self.cmd_select(args).await,
            "INFO" => self.cmd_info().await,
            "COMMAND" => self.cmd_command().await,
            "CONFIG" => self.cmd_config(args).await,
            "DEBUG" => self.cmd_debug(args).await,
            _ => unreachable!(),
        };
        self.monitor.record_latency(&upper, started.elapsed().as_micros() as u64);
        response
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use test_log::test;
    use vkv_base::ManualClock;
    use vkv_monitor::{LatencyHistograms, SessionRegistry};

    struct Echo;

    #[async_trait::async_trait]
    impl CommandHandler for Echo {
        async fn call(&self, _cmd: &str, _args: &[Vec<u8>]) -> Frame {
            Frame::simple("OK")
        }
    }

    fn admin() -> AdminCommands<Echo> {
        let clock: Arc<dyn vkv_base::Clock> = Arc::new(ManualClock::new(0));
        let monitor = Arc::new(Monitor::new(clock, Arc::new(SessionRegistry::new()), Arc::new(LatencyHistograms::new())));
        AdminCommands::new(Echo, ServerConfig::default(), monitor)
    }

    #[test(tokio::test)]
    async fn select_zero_is_ok_other_dbs_are_rejected() {
        let admin = admin();
        assert_eq!(admin.call("SELECT", &[b"0".to_vec()]).await, Frame::simple("OK"));
        assert!(matches!(admin.call("SELECT", &[b"1".to_vec()]).await, Frame::Error(_)));
    }

    #[test(tokio::test)]
    async fn config_get_set_round_trips_a_known_knob() {
        let admin = admin();
        admin.call("CONFIG", &[b"SET".to_vec(), b"gossip_delay".to_vec(), b"5".to_vec()]).await;
        match admin.call("CONFIG", &[b"GET".to_vec(), b"gossip_delay".to_vec()]).await {
            Frame::Array(Some(items)) => assert_eq!(items[1], Frame::bulk(b"5".to_vec())),
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test(tokio::test)]
    async fn unrelated_commands_pass_through() {
        let admin = admin();
        assert_eq!(admin.call("GET", &[]).await, Frame::simple("OK"));
    }

    #[test(tokio::test)]
    async fn debug_latency_reports_stats_after_a_recorded_command() {
        let admin = admin();
        admin.call("SELECT", &[b"0".to_vec()]).await;
        match admin.call("DEBUG", &[b"LATENCY".to_vec(), b"SELECT".to_vec()]).await {
            Frame::Array(Some(items)) => assert_eq!(items.len(), 5),
            other => panic!("expected array, got {other:?}"),
        }
    }
}

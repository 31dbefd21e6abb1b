//! Address aliases on the host data interface.
//!
//! Each leased link end is made reachable by adding its address as an alias
//! on the data interface:
//!
//! ```text
//! ip addr add 10.0.0.1/30 dev eth0 label eth0:0a000001
//! ```
//!
//! The label is derived from the address so stray aliases can be told apart
//! from the interface's own addresses.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::{debug, info};
use wirelab_networking::alias_label;

use super::exec::{HostCommandError, HostExecutor};

/// Host interface that carries link aliases.
#[derive(Clone)]
pub struct HostInterface {
    name: String,
    executor: Arc<dyn HostExecutor>,
}

impl HostInterface {
    pub fn new(name: impl Into<String>, executor: Arc<dyn HostExecutor>) -> Self {
        Self {
            name: name.into(),
            executor,
        }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add `addr/prefix_len` as a labelled alias.
    pub async fn add_alias(&self, addr: Ipv4Addr, prefix_len: u8) -> Result<(), HostCommandError> {
        let cidr = format!("{}/{}", addr, prefix_len);
        let label = alias_label(&self.name, addr);

        let mut args = vec!["addr", "add", cidr.as_str(), "dev", self.name.as_str()];
        if let Some(label) = label.as_deref() {
            args.extend(["label", label]);
        }
        self.executor.run("ip", &args).await?;

        info!(iface = %self.name, address = %cidr, label = ?label, "alias added");
        Ok(())
    }

    /// Remove the alias `addr/prefix_len`.
    pub async fn remove_alias(
        &self,
        addr: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<(), HostCommandError> {
        let cidr = format!("{}/{}", addr, prefix_len);
        self.executor
            .run("ip", &["addr", "del", &cidr, "dev", &self.name])
            .await?;

        info!(iface = %self.name, address = %cidr, "alias removed");
        Ok(())
    }

    /// IPv4 addresses currently configured on the interface.
    pub async fn addresses(&self) -> Result<Vec<Ipv4Addr>, HostCommandError> {
        let output = self
            .executor
            .run("ip", &["-o", "-4", "addr", "show", "dev", &self.name])
            .await?;
        let addrs = parse_addresses(&output);
        debug!(iface = %self.name, count = addrs.len(), "listed interface addresses");
        Ok(addrs)
    }
}

/// Pull the `inet` addresses out of `ip -o -4 addr show` output.
///
/// ```text
/// 2: eth0    inet 10.0.0.1/30 scope global eth0:0a000001\       valid_lft forever ...
/// ```
fn parse_addresses(output: &str) -> Vec<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            words.find(|&w| w == "inet")?;
            let cidr = words.next()?;
            let addr = cidr.split('/').next()?;
            addr.parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        output: String,
    }

    #[async_trait]
    impl HostExecutor for Recorder {
        async fn run(&self, program: &str, args: &[&str]) -> Result<String, HostCommandError> {
            let mut line = vec![program];
            line.extend_from_slice(args);
            self.calls.lock().unwrap().push(line.join(" "));
            Ok(self.output.clone())
        }
    }

    #[test]
    fn test_parse_addresses() {
        let output = "\
2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0\\       valid_lft forever preferred_lft forever
2: eth0    inet 10.0.0.1/30 scope global eth0:0a000001\\       valid_lft forever preferred_lft forever
garbage line";
        let addrs = parse_addresses(output);
        assert_eq!(
            addrs,
            vec![
                "192.168.1.10".parse::<Ipv4Addr>().unwrap(),
                "10.0.0.1".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_parse_addresses_empty() {
        assert!(parse_addresses("").is_empty());
    }

    #[tokio::test]
    async fn test_add_and_remove_alias_commands() {
        let recorder = Arc::new(Recorder::default());
        let iface = HostInterface::new("eth0", recorder.clone());
        let addr: Ipv4Addr = "10.0.0.5".parse().unwrap();

        iface.add_alias(addr, 30).await.unwrap();
        iface.remove_alias(addr, 30).await.unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "ip addr add 10.0.0.5/30 dev eth0 label eth0:0a000005",
                "ip addr del 10.0.0.5/30 dev eth0",
            ]
        );
    }

    #[tokio::test]
    async fn test_add_alias_without_label_for_long_names() {
        let recorder = Arc::new(Recorder::default());
        let iface = HostInterface::new("averylongifname0", recorder.clone());

        iface.add_alias("10.0.0.5".parse().unwrap(), 30).await.unwrap();

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["ip addr add 10.0.0.5/30 dev averylongifname0"]);
    }
}

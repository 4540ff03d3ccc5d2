//! Serial-console command surface
//!
//! The embedding reads a command name off its console (or wherever) and
//! hands it here with a sink for the reply text. Parsing the command line
//! is the embedding's problem. Application handlers registered with
//! `on_command` shadow the built-ins.

use std::fmt::{self, Write};

use crate::node::SwarmNode;

/// Application command handler: writes its reply and is done.
pub type CommandFn = Box<dyn FnMut(&mut dyn fmt::Write)>;

/// Named application handlers, consulted before the built-ins.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: Vec<(String, CommandFn)>,
}

impl CommandRegistry {
    pub fn register(&mut self, name: impl Into<String>, handler: CommandFn) {
        self.handlers.push((name.into(), handler));
    }

    pub fn dispatch(&mut self, name: &str, out: &mut dyn fmt::Write) -> bool {
        for (registered, handler) in &mut self.handlers {
            if registered == name {
                handler(out);
                return true;
            }
        }
        false
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl SwarmNode {
    /// Run one named command, writing its reply into `out`. Returns false
    /// for names nobody claims.
    pub fn handle_command(&mut self, name: &str, out: &mut dyn fmt::Write) -> bool {
        if self.dispatch_custom(name, out) {
            return true;
        }
        match name {
            "status" => {
                let _ = self.write_status(out);
            }
            "peers" => {
                let _ = self.write_peers(out);
            }
            "state" => {
                let _ = self.write_state(out);
            }
            "telemetry-status" => {
                let _ = self.write_telemetry_status(out);
            }
            "ota-status" => {
                let _ = self.write_ota_status(out);
            }
            "push" => {
                let now = self.stats().ticks;
                self.push_telemetry(now);
                let _ = writeln!(out, "telemetry push queued");
            }
            "reboot" => {
                self.request_reboot();
                let _ = writeln!(out, "reboot pending");
            }
            _ => return false,
        }
        true
    }

    fn write_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let stats = self.stats();
        writeln!(out, "node {} role {}", self.node_id(), self.role())?;
        match self.coordinator().coordinator {
            Some(coordinator) => writeln!(
                out,
                "coordinator {} (epoch {}){}",
                coordinator,
                self.coordinator().epoch,
                if self.is_coordinator() { " <- this node" } else { "" }
            )?,
            None => writeln!(out, "coordinator unknown")?,
        }
        writeln!(
            out,
            "uptime {} ticks, {} peers, {} keys",
            stats.ticks,
            self.peer_count(),
            self.store().len()
        )?;
        writeln!(
            out,
            "in {} out {} decode-errors {} syncs-served {}",
            stats.messages_in, stats.messages_out, stats.decode_errors, stats.syncs_served
        )
    }

    fn write_peers(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for peer in self.peers().iter() {
            writeln!(
                out,
                "{} role={} last-seen={}",
                peer.id,
                peer.role.as_ref().map(|r| r.as_str()).unwrap_or("?"),
                peer.last_seen
            )?;
        }
        writeln!(out, "{} peers", self.peer_count())
    }

    fn write_state(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        for (key, entry) in self.store().iter() {
            writeln!(
                out,
                "{key}={} (tick {}, origin {})",
                entry.value, entry.stamp.tick, entry.stamp.origin
            )?;
        }
        writeln!(out, "{} keys", self.store().len())
    }

    fn write_telemetry_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match self.bridge_stats() {
            Some(stats) => writeln!(
                out,
                "pushed {} failed-attempts {} dropped {} overflowed {}",
                stats.pushed, stats.failed_attempts, stats.dropped, stats.overflowed
            ),
            None => writeln!(out, "not a gateway"),
        }
    }

    fn write_ota_status(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        match self.receiver() {
            Some(receiver) => {
                let stats = receiver.stats();
                writeln!(
                    out,
                    "firmware v{}, session {}, reboot-pending {}",
                    receiver.running_version(),
                    match receiver.session_version() {
                        Some(version) => format!("receiving v{version}"),
                        None => "idle".to_string(),
                    },
                    receiver.reboot_pending()
                )?;
                writeln!(
                    out,
                    "completed {} aborted-checksum {} aborted-timeout {} nacks {}",
                    stats.completed, stats.aborted_checksum, stats.aborted_timeout, stats.nacks_sent
                )?;
            }
            None => writeln!(out, "ota receive disabled")?,
        }
        if let Some(distributor) = self.distributor() {
            let stats = distributor.stats();
            writeln!(
                out,
                "distributing {}, sessions {}/{} chunks {} resent {}",
                distributor.session_active(),
                stats.sessions_finished,
                stats.sessions_started,
                stats.chunks_sent,
                stats.chunks_resent
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfig;
    use murmur_core::{NodeId, RoleTag};

    fn node() -> SwarmNode {
        SwarmNode::new(
            NodeId::new(0x42),
            NodeConfig {
                role: RoleTag::from("button"),
                ..NodeConfig::default()
            },
        )
    }

    #[test]
    fn test_status_reports_identity_and_counters() {
        let mut n = node();
        n.tick();
        n.set("led", "1");

        let mut out = String::new();
        assert!(n.handle_command("status", &mut out));
        assert!(out.contains("node 00000042 role button"));
        assert!(out.contains("1 keys"));
    }

    #[test]
    fn test_state_lists_entries() {
        let mut n = node();
        n.set("led", "1");
        n.set("mode", "auto");

        let mut out = String::new();
        assert!(n.handle_command("state", &mut out));
        assert!(out.contains("led=1"));
        assert!(out.contains("mode=auto"));
        assert!(out.contains("2 keys"));
    }

    #[test]
    fn test_unknown_command_unclaimed() {
        let mut n = node();
        let mut out = String::new();
        assert!(!n.handle_command("frobnicate", &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn test_custom_handler_shadows_builtin() {
        let mut n = node();
        n.on_command("status", |out: &mut dyn fmt::Write| {
            let _ = writeln!(out, "custom");
        });

        let mut out = String::new();
        assert!(n.handle_command("status", &mut out));
        assert_eq!(out, "custom\n");
    }

    #[test]
    fn test_reboot_sets_pending_flag_only() {
        let mut n = node();
        let mut out = String::new();
        assert!(!n.reboot_pending());
        assert!(n.handle_command("reboot", &mut out));
        assert!(n.reboot_pending());
        // the loop keeps running; rebooting is the embedding's job
        n.tick();
        assert_eq!(n.stats().ticks, 1);
    }

    #[test]
    fn test_telemetry_status_without_bridge() {
        let mut n = node();
        let mut out = String::new();
        assert!(n.handle_command("telemetry-status", &mut out));
        assert!(out.contains("not a gateway"));
    }

    #[test]
    fn test_push_broadcasts_immediately() {
        let mut n = node();
        n.tick();
        while n.pop_outgoing().is_some() {}

        let mut out = String::new();
        assert!(n.handle_command("push", &mut out));
        let sent = n.pop_outgoing().unwrap();
        assert!(matches!(
            murmur_wire::Message::decode(&sent.payload),
            Ok(murmur_wire::Message::Telemetry(_))
        ));
    }
}

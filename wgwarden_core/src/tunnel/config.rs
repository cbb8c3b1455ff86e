//! WireGuard tunnel configuration text (`[Interface]` / `[Peer]`).
//!
//! Parsing is permissive: comments, blank lines, malformed lines and
//! unrecognised sections are skipped rather than rejected. Missing sections
//! simply yield empty mappings.

use std::fmt::Write as _;

/// Ordered key/value mapping for one configuration section.
///
/// Keys compare case-insensitively. Inserting an existing key replaces its
/// value in place, so the last write wins while first-appearance order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn new() -> Self {
        Section::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&key))
        {
            Some(entry) => *entry = (key, value),
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionKind {
    Interface,
    Peer,
}

/// Parsed tunnel configuration.
///
/// Immutable after construction; the raw text is kept because the engine
/// consumes it verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    raw: String,
    interface: Section,
    peer: Section,
}

impl TunnelConfig {
    /// Parse configuration text. Never fails.
    pub fn parse(text: &str) -> Self {
        let mut interface = Section::new();
        let mut peer = Section::new();
        let mut current: Option<SectionKind> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                current = match line[1..line.len() - 1].trim().to_ascii_lowercase().as_str() {
                    "interface" => Some(SectionKind::Interface),
                    "peer" => Some(SectionKind::Peer),
                    _ => None,
                };
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }

            match current {
                Some(SectionKind::Interface) => interface.insert(key, value.trim()),
                Some(SectionKind::Peer) => peer.insert(key, value.trim()),
                None => {}
            }
        }

        TunnelConfig {
            raw: text.trim().to_string(),
            interface,
            peer,
        }
    }

    /// Render the recognised sections back to configuration text.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (header, section) in [("Interface", &self.interface), ("Peer", &self.peer)] {
            if section.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", header);
            for (key, value) in section.iter() {
                let _ = writeln!(out, "{} = {}", key, value);
            }
        }
        out
    }

    /// The original text, trimmed.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn interface(&self) -> &Section {
        &self.interface
    }

    pub fn peer(&self) -> &Section {
        &self.peer
    }

    /// Host part of the peer `Endpoint` (`host:port` or `[v6]:port`).
    pub fn endpoint_host(&self) -> Option<&str> {
        let endpoint = self.peer.get("Endpoint")?.trim();
        if let Some(rest) = endpoint.strip_prefix('[') {
            return rest.split_once(']').map(|(host, _)| host);
        }
        let host = match endpoint.rsplit_once(':') {
            Some((host, _)) => host,
            None => endpoint,
        };
        Some(host).filter(|host| !host.is_empty())
    }

    /// Interface addresses from the comma-separated `Address` value.
    pub fn addresses(&self) -> Vec<&str> {
        self.interface
            .get("Address")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn mtu(&self) -> Option<u32> {
        self.interface.get("MTU")?.trim().parse().ok()
    }
}

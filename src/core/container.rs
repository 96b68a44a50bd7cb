//! Container model - Docker records and their derived display fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of the short id prefix shown by docker itself.
pub const SHORT_ID_LEN: usize = 12;

/// Sort key for containers whose status text could not be parsed; sorts last
/// in ascending order.
pub const AGE_UNPARSABLE: u64 = u64::MAX;

/// Status of a container, coarsened from docker's `State` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerStatus {
    Running,
    Paused,
    Exited,
    Created,
    /// Any state the engine does not track specifically (restarting, dead, ...)
    Other,
}

impl ContainerStatus {
    pub fn from_state(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "created" => Self::Created,
            _ => Self::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Exited => "Exited",
            Self::Created => "Created",
            Self::Other => "Other",
        }
    }
}

/// A container as fetched from `docker ps`. Identity is `id`; `name` acts as
/// a fallback match key for pins so they survive recreation under the same
/// name. Only the id ever reaches the persisted pin list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: ContainerStatus,
    /// Free-form status line from the runtime ("Up 3 weeks", "Exited (0) ...")
    pub status_text: String,
    /// Raw port string as docker prints it
    pub ports: String,
    /// Raw creation timestamp string
    pub created: String,
}

impl Container {
    pub fn short_id(&self) -> &str {
        if self.id.len() > SHORT_ID_LEN {
            &self.id[..SHORT_ID_LEN]
        } else {
            &self.id
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Creation time parsed from docker's `CreatedAt` format, when possible.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_str(&self.created, "%Y-%m-%d %H:%M:%S %z UTC")
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Ascending sort key derived from the status text: youngest first.
    ///
    /// Non-running containers get a one second penalty so an equally-aged
    /// stopped container sorts after a running one. Unparsable text sorts
    /// last.
    pub fn age_sort_key(&self) -> u64 {
        match parse_age_seconds(&self.status_text) {
            Some(base) if self.is_running() => base,
            Some(base) => base + 1,
            None => AGE_UNPARSABLE,
        }
    }

    /// Host->container TCP port pairs for display.
    pub fn display_ports(&self) -> Vec<String> {
        parse_ports(&self.ports)
    }
}

/// One line of `docker ps -a --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
pub(crate) struct PsRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Names")]
    pub names: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "State")]
    pub state: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Ports", default)]
    pub ports: String,
    #[serde(rename = "CreatedAt", default)]
    pub created_at: String,
}

impl From<PsRecord> for Container {
    fn from(rec: PsRecord) -> Self {
        Self {
            status: ContainerStatus::from_state(&rec.state),
            id: rec.id,
            name: rec.names,
            image: rec.image,
            status_text: rec.status,
            ports: rec.ports,
            created: rec.created_at,
        }
    }
}

/// Parse the leading quantity+unit out of a runtime status line.
///
/// "Up 3 weeks" -> 1814400, "Exited (0) About a minute ago" -> 60. Returns
/// None when no quantity+unit pair is found.
fn parse_age_seconds(text: &str) -> Option<u64> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    for (i, tok) in tokens.iter().enumerate() {
        let (amount, unit_idx) = if let Ok(n) = tok.parse::<u64>() {
            (n, i + 1)
        } else if tok.eq_ignore_ascii_case("about") {
            // "About a minute", "About an hour"
            let mut j = i + 1;
            while matches!(tokens.get(j), Some(&"a") | Some(&"an")) {
                j += 1;
            }
            (1, j)
        } else {
            continue;
        };

        let unit = tokens.get(unit_idx)?;
        return unit_seconds(unit).map(|secs| amount.saturating_mul(secs));
    }
    None
}

fn unit_seconds(unit: &str) -> Option<u64> {
    match unit.trim_end_matches('s') {
        "second" => Some(1),
        "minute" => Some(60),
        "hour" => Some(3600),
        "day" => Some(86400),
        "week" => Some(604800),
        "month" => Some(2_592_000),
        "year" => Some(31_536_000),
        _ => None,
    }
}

/// Reduce docker's raw port string to deduplicated `host->container` pairs.
///
/// Input entries look like `0.0.0.0:9243->443/tcp`; only `/tcp` entries are
/// kept, the address prefix (IPv4, IPv6 or wildcard) is stripped down to the
/// host port, and first-seen order is preserved.
pub fn parse_ports(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for entry in raw.split(',').map(str::trim) {
        let Some(stripped) = entry.strip_suffix("/tcp") else {
            continue;
        };
        let Some((host, container)) = stripped.split_once("->") else {
            continue;
        };
        let host_port = host.rsplit(':').next().unwrap_or("");
        if host_port.is_empty() {
            continue;
        }
        let mapped = format!("{host_port}->{container}");
        if !out.contains(&mapped) {
            out.push(mapped);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(status: ContainerStatus, status_text: &str) -> Container {
        Container {
            id: "0123456789abcdef".to_string(),
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            status,
            status_text: status_text.to_string(),
            ports: String::new(),
            created: "2024-01-15 10:30:00 +0000 UTC".to_string(),
        }
    }

    #[test]
    fn short_id_is_a_twelve_char_prefix() {
        let c = container(ContainerStatus::Running, "Up 2 hours");
        assert_eq!(c.short_id(), "0123456789ab");
    }

    #[test]
    fn state_coarsening() {
        assert_eq!(ContainerStatus::from_state("running"), ContainerStatus::Running);
        assert_eq!(ContainerStatus::from_state("Exited"), ContainerStatus::Exited);
        assert_eq!(ContainerStatus::from_state("restarting"), ContainerStatus::Other);
        assert_eq!(ContainerStatus::from_state("dead"), ContainerStatus::Other);
    }

    #[test]
    fn age_about_a_minute_is_sixty_seconds() {
        let c = container(ContainerStatus::Running, "Up About a minute");
        assert_eq!(c.age_sort_key(), 60);
    }

    #[test]
    fn age_three_weeks() {
        let c = container(ContainerStatus::Running, "Up 3 weeks");
        assert_eq!(c.age_sort_key(), 1_814_400);
    }

    #[test]
    fn unparsable_age_sorts_last() {
        let c = container(ContainerStatus::Running, "Restarting");
        assert_eq!(c.age_sort_key(), AGE_UNPARSABLE);
    }

    #[test]
    fn stopped_container_sorts_after_equally_aged_running_one() {
        let up = container(ContainerStatus::Running, "Up 2 hours");
        let down = container(ContainerStatus::Exited, "Exited (0) 2 hours ago");
        assert!(down.age_sort_key() > up.age_sort_key());
        assert_eq!(down.age_sort_key() - up.age_sort_key(), 1);
    }

    #[test]
    fn age_exited_status_still_parses() {
        let c = container(ContainerStatus::Exited, "Exited (137) 4 days ago");
        assert_eq!(c.age_sort_key(), 4 * 86400 + 1);
    }

    #[test]
    fn port_parsing_dedups_across_address_families() {
        let out = parse_ports("0.0.0.0:9243->443/tcp, :::9243->443/tcp, 0.0.0.0:5432->5432/tcp");
        assert_eq!(out, ["9243->443", "5432->5432"]);
    }

    #[test]
    fn port_parsing_drops_non_tcp_and_unmapped() {
        let out = parse_ports("0.0.0.0:53->53/udp, 8080/tcp, 127.0.0.1:8080->80/tcp");
        assert_eq!(out, ["8080->80"]);
    }

    #[test]
    fn port_parsing_empty_input() {
        assert!(parse_ports("").is_empty());
    }

    #[test]
    fn created_at_parses_docker_format() {
        let c = container(ContainerStatus::Running, "Up 1 second");
        let parsed = c.created_at().expect("should parse");
        assert_eq!(parsed.to_rfc3339(), "2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn ps_record_json_round_trip() {
        let line = r#"{"ID":"abc","Names":"db","Image":"postgres:16","State":"running","Status":"Up 5 minutes","Ports":"0.0.0.0:5432->5432/tcp","CreatedAt":"2024-01-15 10:30:00 +0000 UTC"}"#;
        let rec: PsRecord = serde_json::from_str(line).unwrap();
        let c: Container = rec.into();
        assert_eq!(c.name, "db");
        assert_eq!(c.status, ContainerStatus::Running);
        assert_eq!(c.display_ports(), ["5432->5432"]);
    }
}

//! Network rule sets
//!
//! A rule set is immutable once constructed: fields are private and the
//! only way in is [`NetworkRuleSet::new`], which validates every rule.

use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
    /// Any protocol
    #[serde(alias = "-1")]
    All,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::All => "all",
        };
        f.write_str(s)
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    /// First port
    pub from: u16,
    /// Last port
    pub to: u16,
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

/// One allow rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    /// Protocol
    pub protocol: Protocol,
    /// Ports
    pub ports: PortRange,
    /// Allowed source (ingress) or destination (egress) ranges
    pub cidr_blocks: Vec<String>,
    /// Free-form note
    pub description: Option<String>,
}

impl Rule {
    /// Rule allowing `protocol` on `ports` from/to `cidr_blocks`
    #[must_use]
    pub fn allow<I, S>(protocol: Protocol, ports: PortRange, cidr_blocks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            protocol,
            ports,
            cidr_blocks: cidr_blocks.into_iter().map(Into::into).collect(),
            description: None,
        }
    }

    /// With a free-form note
    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    fn check(&self) -> Result<(), RuleError> {
        if self.ports.from > self.ports.to {
            return Err(RuleError::ReversedPorts {
                from: self.ports.from,
                to: self.ports.to,
            });
        }
        for cidr in &self.cidr_blocks {
            check_cidr(cidr)?;
        }
        Ok(())
    }
}

fn check_cidr(cidr: &str) -> Result<(), RuleError> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| RuleError::NotCidr(cidr.to_string()))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| RuleError::InvalidAddress(cidr.to_string()))?;
    let max: u8 = if addr.is_ipv4() { 32 } else { 128 };
    match prefix.parse::<u8>() {
        Ok(prefix) if prefix <= max => Ok(()),
        _ => Err(RuleError::InvalidPrefix {
            cidr: cidr.to_string(),
            max,
        }),
    }
}

/// Ordered ingress and egress rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkRuleSet {
    description: Option<String>,
    ingress: Vec<Rule>,
    egress: Vec<Rule>,
}

impl NetworkRuleSet {
    /// Build a validated rule set
    ///
    /// # Errors
    /// `RuleError` for the first malformed rule.
    pub fn new(
        description: Option<String>,
        ingress: Vec<Rule>,
        egress: Vec<Rule>,
    ) -> Result<Self, RuleError> {
        for rule in ingress.iter().chain(&egress) {
            rule.check()?;
        }
        Ok(Self {
            description,
            ingress,
            egress,
        })
    }

    /// Description, if declared
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Inbound rules in declaration order
    #[must_use]
    pub fn ingress(&self) -> &[Rule] {
        &self.ingress
    }

    /// Outbound rules in declaration order
    #[must_use]
    pub fn egress(&self) -> &[Rule] {
        &self.egress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn port(port: u16) -> PortRange {
        PortRange { from: port, to: port }
    }

    #[test]
    fn accepts_database_rule_set() {
        let rules = NetworkRuleSet::new(
            Some("mongo".into()),
            vec![Rule::allow(Protocol::Tcp, port(27017), ["10.0.0.0/16"])],
            vec![Rule::allow(Protocol::All, port(0), ["0.0.0.0/0"])],
        )
        .unwrap();

        assert_eq!(rules.description(), Some("mongo"));
        assert_eq!(rules.ingress()[0].ports.to_string(), "27017");
        assert_eq!(rules.egress()[0].protocol, Protocol::All);
    }

    #[test]
    fn rejects_reversed_ports_and_bad_cidrs() {
        let reversed = Rule::allow(Protocol::Tcp, PortRange { from: 90, to: 80 }, ["0.0.0.0/0"]);
        assert_eq!(
            NetworkRuleSet::new(None, vec![reversed], vec![]),
            Err(RuleError::ReversedPorts { from: 90, to: 80 })
        );

        let cases = [
            ("10.0.0.0", RuleError::NotCidr("10.0.0.0".into())),
            (
                "10.0.0.0/33",
                RuleError::InvalidPrefix { cidr: "10.0.0.0/33".into(), max: 32 },
            ),
            ("not-an-ip/8", RuleError::InvalidAddress("not-an-ip/8".into())),
            ("::/129", RuleError::InvalidPrefix { cidr: "::/129".into(), max: 128 }),
        ];
        for (cidr, expected) in cases {
            let rule = Rule::allow(Protocol::Tcp, port(22), [cidr]);
            assert_eq!(NetworkRuleSet::new(None, vec![rule], vec![]), Err(expected), "{cidr}");
        }

        let v6 = Rule::allow(Protocol::Tcp, port(22), ["::/0"]);
        assert!(NetworkRuleSet::new(None, vec![v6], vec![]).is_ok());
    }
}

//! Interface selector: single name, comma list with `!` negations, `any`,
//! or a `/regex/` pattern.

use gpf_core::dir::is_valid_iface_name;
use gpf_core::error::{Error, Result};
use regex::Regex;

#[derive(Debug, Clone)]
enum Selector {
    /// Positive names (empty = start from all), minus negated names.
    List {
        positives: Vec<String>,
        negations: Vec<String>,
        any: bool,
    },
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct IfaceSelector {
    selector: Selector,
}

impl IfaceSelector {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidQuery("empty interface selector".to_string()));
        }

        if let Some(pattern) = input.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
            let re = Regex::new(pattern).map_err(|e| {
                Error::InvalidQuery(format!("invalid interface regex {pattern:?}: {e}"))
            })?;
            return Ok(Self {
                selector: Selector::Pattern(re),
            });
        }

        let mut positives = Vec::new();
        let mut negations = Vec::new();
        let mut any = false;
        for item in input.split(',') {
            let item = item.trim();
            if item == "any" {
                any = true;
                continue;
            }
            let (negated, name) = match item.strip_prefix('!') {
                Some(name) => (true, name),
                None => (false, item),
            };
            if !is_valid_iface_name(name) {
                return Err(Error::InvalidQuery(format!(
                    "invalid interface name {item:?}"
                )));
            }
            if negated {
                negations.push(name.to_string());
            } else {
                positives.push(name.to_string());
            }
        }
        Ok(Self {
            selector: Selector::List {
                positives,
                negations,
                any,
            },
        })
    }

    /// Apply the selector to the interfaces present in the database.
    /// Positive terms union (falling back to all interfaces when only
    /// negations or `any` were given); negations are then removed.
    pub fn select(&self, available: &[String]) -> Vec<String> {
        match &self.selector {
            Selector::Pattern(re) => available
                .iter()
                .filter(|name| re.is_match(name))
                .cloned()
                .collect(),
            Selector::List {
                positives,
                negations,
                any,
            } => {
                let mut selected: Vec<String> = if *any || positives.is_empty() {
                    available.to_vec()
                } else {
                    available
                        .iter()
                        .filter(|name| positives.contains(name))
                        .cloned()
                        .collect()
                };
                selected.retain(|name| !negations.contains(name));
                selected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avail(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_name_and_list() {
        let present = avail(&["eth0", "eth1", "wlan0"]);
        assert_eq!(
            IfaceSelector::parse("eth0").unwrap().select(&present),
            avail(&["eth0"])
        );
        assert_eq!(
            IfaceSelector::parse("eth0,wlan0").unwrap().select(&present),
            avail(&["eth0", "wlan0"])
        );
    }

    #[test]
    fn any_and_negation() {
        let present = avail(&["eth0", "eth1", "wlan0"]);
        assert_eq!(
            IfaceSelector::parse("any").unwrap().select(&present),
            present
        );
        assert_eq!(
            IfaceSelector::parse("any,!eth1").unwrap().select(&present),
            avail(&["eth0", "wlan0"])
        );
        // Only negations: start from everything present.
        assert_eq!(
            IfaceSelector::parse("!wlan0").unwrap().select(&present),
            avail(&["eth0", "eth1"])
        );
    }

    #[test]
    fn regex_selector() {
        let present = avail(&["eth0", "eth1", "wlan0"]);
        assert_eq!(
            IfaceSelector::parse("/^eth[0-9]+$/").unwrap().select(&present),
            avail(&["eth0", "eth1"])
        );
    }

    #[test]
    fn invalid_selectors() {
        assert!(IfaceSelector::parse("").is_err());
        assert!(IfaceSelector::parse("not/valid").is_err());
        assert!(IfaceSelector::parse("way-too-long-interface-name").is_err());
        assert!(IfaceSelector::parse("/[unclosed/").is_err());
    }
}

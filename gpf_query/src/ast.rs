//! Predicate tree over the four flow attributes.
//!
//! Leaves compare one attribute against a literal; inner nodes are the
//! boolean connectives. Every node knows which IP families it can possibly
//! match, so the scanner can skip an entire row half when the whole
//! predicate resolves to a single family.

use std::cmp::Ordering;

use gpf_core::Counters;

/// Comparison operators. The ordered ones apply only to `dport` and
/// `proto`; the parser rejects them on IP attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Neq,
    Lt,
    Leq,
    Gt,
    Geq,
}

impl CompOp {
    fn matches(self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Neq => ord != Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Leq => ord != Ordering::Greater,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Geq => ord != Ordering::Less,
        }
    }
}

/// An IP literal, carrying its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpLiteral {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl IpLiteral {
    pub fn bytes(&self) -> &[u8] {
        match self {
            IpLiteral::V4(b) => b,
            IpLiteral::V6(b) => b,
        }
    }

    pub fn is_v6(&self) -> bool {
        matches!(self, IpLiteral::V6(_))
    }

    /// Address width in bits (the prefix length of a host condition).
    pub fn full_prefix_len(&self) -> u8 {
        match self {
            IpLiteral::V4(_) => 32,
            IpLiteral::V6(_) => 128,
        }
    }
}

/// Which of the two IP columns a leaf refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAttr {
    Sip,
    Dip,
}

/// A single attribute comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `sip`/`dip` (or `snet`/`dnet`, which carry a shortened prefix)
    /// against an IP literal. Only `=` and `!=` are meaningful here.
    Ip {
        attr: IpAttr,
        op: CompOp,
        addr: IpLiteral,
        prefix_len: u8,
    },
    Dport {
        op: CompOp,
        value: u16,
    },
    Proto {
        op: CompOp,
        value: u8,
    },
}

/// One row's attribute view, as sliced out of the decoded column blocks.
/// Unplanned attributes stay empty/zero; the planner guarantees that every
/// attribute a predicate references is planned.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowAttrs<'a> {
    pub is_v6: bool,
    pub sip: &'a [u8],
    pub dip: &'a [u8],
    pub dport: [u8; 2],
    pub proto: u8,
}

/// Bytewise prefix comparison under a CIDR-style mask.
fn masked_eq(a: &[u8], b: &[u8], prefix_len: u8) -> bool {
    let full = (prefix_len / 8) as usize;
    if a[..full] != b[..full] {
        return false;
    }
    let rem = prefix_len % 8;
    if rem == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rem);
    (a[full] ^ b[full]) & mask == 0
}

impl Condition {
    fn eval(&self, row: &RowAttrs) -> bool {
        match self {
            Condition::Ip {
                attr,
                op,
                addr,
                prefix_len,
            } => {
                // A literal of the other family can never match the row;
                // the leaf is simply false, the query continues.
                if addr.is_v6() != row.is_v6 {
                    return false;
                }
                let col = match attr {
                    IpAttr::Sip => row.sip,
                    IpAttr::Dip => row.dip,
                };
                let eq = masked_eq(col, addr.bytes(), *prefix_len);
                match op {
                    CompOp::Eq => eq,
                    CompOp::Neq => !eq,
                    _ => false,
                }
            }
            Condition::Dport { op, value } => {
                let row_port = u16::from_be_bytes(row.dport);
                op.matches(row_port.cmp(value))
            }
            Condition::Proto { op, value } => op.matches(row.proto.cmp(value)),
        }
    }

    fn versions(&self) -> IpVersions {
        match self {
            Condition::Ip { addr, .. } if addr.is_v6() => IpVersions { v4: false, v6: true },
            Condition::Ip { .. } => IpVersions { v4: true, v6: false },
            _ => IpVersions::BOTH,
        }
    }
}

/// The set of IP families a predicate node can possibly match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpVersions {
    pub v4: bool,
    pub v6: bool,
}

impl IpVersions {
    pub const BOTH: IpVersions = IpVersions { v4: true, v6: true };
}

/// Predicate tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Condition),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
}

impl Node {
    pub fn eval(&self, row: &RowAttrs) -> bool {
        match self {
            Node::Leaf(cond) => cond.eval(row),
            Node::Not(inner) => !inner.eval(row),
            Node::And(a, b) => a.eval(row) && b.eval(row),
            Node::Or(a, b) => a.eval(row) || b.eval(row),
        }
    }

    /// Possible-match families. A negated subtree widens to both families:
    /// `!(sip = 10.0.0.1)` holds for every IPv6 row, because the inner leaf
    /// is false there.
    pub fn ip_versions(&self) -> IpVersions {
        match self {
            Node::Leaf(cond) => cond.versions(),
            Node::Not(_) => IpVersions::BOTH,
            Node::And(a, b) => {
                let (x, y) = (a.ip_versions(), b.ip_versions());
                IpVersions {
                    v4: x.v4 && y.v4,
                    v6: x.v6 && y.v6,
                }
            }
            Node::Or(a, b) => {
                let (x, y) = (a.ip_versions(), b.ip_versions());
                IpVersions {
                    v4: x.v4 || y.v4,
                    v6: x.v6 || y.v6,
                }
            }
        }
    }

    /// Whether any leaf references `attr` — drives the planner's column
    /// selection.
    pub fn references_ip(&self, attr: IpAttr) -> bool {
        match self {
            Node::Leaf(Condition::Ip { attr: a, .. }) => *a == attr,
            Node::Leaf(_) => false,
            Node::Not(inner) => inner.references_ip(attr),
            Node::And(a, b) | Node::Or(a, b) => {
                a.references_ip(attr) || b.references_ip(attr)
            }
        }
    }

    pub fn references_dport(&self) -> bool {
        match self {
            Node::Leaf(cond) => matches!(cond, Condition::Dport { .. }),
            Node::Not(inner) => inner.references_dport(),
            Node::And(a, b) | Node::Or(a, b) => a.references_dport() || b.references_dport(),
        }
    }

    pub fn references_proto(&self) -> bool {
        match self {
            Node::Leaf(cond) => matches!(cond, Condition::Proto { .. }),
            Node::Not(inner) => inner.references_proto(),
            Node::And(a, b) | Node::Or(a, b) => a.references_proto() || b.references_proto(),
        }
    }
}

// ── Direction filter ───────────────────────────────────────────────────────

/// Top-level direction filter, evaluated on a row's decoded counters after
/// the predicate tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionFilter {
    /// Traffic was only received.
    In,
    /// Traffic was only sent.
    Out,
    /// Exactly one direction carries traffic.
    Uni,
    /// Both directions carry traffic.
    Bi,
}

impl DirectionFilter {
    pub fn matches(&self, counters: &Counters) -> bool {
        let rcvd = counters.received_any();
        let sent = counters.sent_any();
        match self {
            DirectionFilter::In => rcvd && !sent,
            DirectionFilter::Out => sent && !rcvd,
            DirectionFilter::Uni => rcvd != sent,
            DirectionFilter::Bi => rcvd && sent,
        }
    }
}

//! CE-001: Entity, plan, lock, and provenance types.
//!
//! Every declared entity carries the names of the entities it depends on.
//! All types derive Serialize/Deserialize so plans and locks can be written
//! to YAML or JSON for inspection and diffing.

use indexmap::IndexMap;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Entity kinds
// ============================================================================

/// The kind of a declared entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Network,
    Subnet,
    SecurityGroup,
    Role,
    Compute,
    Environment,
    SearchCluster,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Subnet => write!(f, "subnet"),
            Self::SecurityGroup => write!(f, "security_group"),
            Self::Role => write!(f, "role"),
            Self::Compute => write!(f, "compute"),
            Self::Environment => write!(f, "environment"),
            Self::SearchCluster => write!(f, "search_cluster"),
        }
    }
}

// ============================================================================
// Network
// ============================================================================

/// A contiguous IPv4 address range assigned to the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBlock {
    pub name: String,
    pub cidr: Ipv4Net,
    /// Upper bound on zones the block may span
    pub max_azs: u8,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Subnet classification. Public sorts before private.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Public,
    Private,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// An availability zone, identified by its position in the zone list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Zone {
    pub index: u8,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub name: String,
    /// Owning network block
    pub network: String,
    pub zone: Zone,
    pub classification: Classification,
    pub cidr: Ipv4Net,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// ============================================================================
// Access policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Icmp => write!(f, "icmp"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Protocol plus an inclusive port range. For ICMP the range covers
/// message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub protocol: Protocol,
    pub from: u16,
    pub to: u16,
}

impl Port {
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from: port,
            to: port,
        }
    }

    pub fn tcp_range(from: u16, to: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            from,
            to,
        }
    }

    pub fn all_tcp() -> Self {
        Self::tcp_range(0, u16::MAX)
    }

    pub fn all_icmp() -> Self {
        Self {
            protocol: Protocol::Icmp,
            from: 0,
            to: u16::MAX,
        }
    }

    pub fn all_traffic() -> Self {
        Self {
            protocol: Protocol::All,
            from: 0,
            to: u16::MAX,
        }
    }

    /// True when the range spans every port of its protocol.
    pub fn is_full_range(&self) -> bool {
        self.from == 0 && self.to == u16::MAX
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full_range() {
            write!(f, "{}/all", self.protocol)
        } else if self.from == self.to {
            write!(f, "{}/{}", self.protocol, self.from)
        } else {
            write!(f, "{}/{}-{}", self.protocol, self.from, self.to)
        }
    }
}

/// Source (ingress) or destination (egress) selector of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Peer {
    /// Any IPv4 address. Must always be written out explicitly.
    AnyIpv4,
    Cidr(Ipv4Net),
    /// Another security group, by entity name
    Group(String),
}

impl Peer {
    pub fn is_world(&self) -> bool {
        match self {
            Self::AnyIpv4 => true,
            Self::Cidr(net) => net.prefix_len() == 0,
            Self::Group(_) => false,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyIpv4 => write!(f, "0.0.0.0/0"),
            Self::Cidr(net) => write!(f, "{}", net),
            Self::Group(name) => write!(f, "sg:{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

/// Whether a rule is reachable from the whole internet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    World,
    Scoped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub direction: Direction,
    pub port: Port,
    pub peer: Peer,
    #[serde(default)]
    pub description: String,
    pub scope: RuleScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub name: String,
    /// Owning network block
    pub network: String,
    #[serde(default)]
    pub description: String,
    /// Must be stated; `None` fails validation
    #[serde(default)]
    pub allow_all_outbound: Option<bool>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl SecurityGroup {
    /// Ingress rules open to any address.
    pub fn world_ingress(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| r.direction == Direction::Ingress && r.scope == RuleScope::World)
    }

    /// Security groups referenced as rule peers.
    pub fn peer_groups(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(|r| match &r.peer {
            Peer::Group(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// A principal that may assume a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// A cloud service, e.g. `ec2.amazonaws.com`
    Service(String),
    /// An account or user ARN
    Arn(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(s) => write!(f, "service:{}", s),
            Self::Arn(a) => write!(f, "{}", a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRole {
    pub name: String,
    #[serde(default)]
    pub managed_policies: Vec<String>,
    /// At most one principal in this topology
    #[serde(default)]
    pub assumed_by: Vec<Principal>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// ============================================================================
// Compute, environment, search
// ============================================================================

/// Instance size classes for the bastion and the managed environment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
pub enum InstanceSize {
    #[serde(rename = "t3.micro")]
    T3Micro,
    #[serde(rename = "t3.small")]
    T3Small,
    #[serde(rename = "t3.medium")]
    T3Medium,
    #[serde(rename = "t3.large")]
    T3Large,
    #[serde(rename = "t3.xlarge")]
    T3Xlarge,
    #[serde(rename = "m5.large")]
    M5Large,
    #[serde(rename = "m5.xlarge")]
    M5Xlarge,
}

impl fmt::Display for InstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::T3Micro => "t3.micro",
            Self::T3Small => "t3.small",
            Self::T3Medium => "t3.medium",
            Self::T3Large => "t3.large",
            Self::T3Xlarge => "t3.xlarge",
            Self::M5Large => "m5.large",
            Self::M5Xlarge => "m5.xlarge",
        };
        write!(f, "{}", s)
    }
}

/// Node size classes for the search cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
pub enum SearchInstanceSize {
    #[serde(rename = "t3.small.search")]
    T3SmallSearch,
    #[serde(rename = "t3.medium.search")]
    T3MediumSearch,
    #[serde(rename = "m6g.large.search")]
    M6gLargeSearch,
    #[serde(rename = "m6g.xlarge.search")]
    M6gXlargeSearch,
    #[serde(rename = "r6g.large.search")]
    R6gLargeSearch,
    #[serde(rename = "r6g.xlarge.search")]
    R6gXlargeSearch,
}

impl fmt::Display for SearchInstanceSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::T3SmallSearch => "t3.small.search",
            Self::T3MediumSearch => "t3.medium.search",
            Self::M6gLargeSearch => "m6g.large.search",
            Self::M6gXlargeSearch => "m6g.xlarge.search",
            Self::R6gLargeSearch => "r6g.large.search",
            Self::R6gXlargeSearch => "r6g.xlarge.search",
        };
        write!(f, "{}", s)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CpuType {
    X86_64,
    Arm64,
}

impl fmt::Display for CpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86_64 => write!(f, "x86_64"),
            Self::Arm64 => write!(f, "arm64"),
        }
    }
}

/// Machine image reference, resolved by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineImage {
    pub family: String,
    pub cpu: CpuType,
}

impl fmt::Display for MachineImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.cpu)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeNode {
    pub name: String,
    pub size: InstanceSize,
    pub image: MachineImage,
    pub network: String,
    pub subnet: String,
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A managed IDE environment bound to one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedEnvironment {
    pub name: String,
    pub size: InstanceSize,
    /// Must be a public subnet
    pub subnet: String,
    pub owner: String,
    #[serde(default)]
    pub auto_stop_minutes: Option<u32>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    #[default]
    Destroy,
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCluster {
    pub name: String,
    pub engine_version: String,
    pub zone_awareness: bool,
    pub data_node_count: u32,
    pub data_node_size: SearchInstanceSize,
    #[serde(default)]
    pub master_node_size: Option<SearchInstanceSize>,
    pub network: String,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub removal_policy: RemovalPolicy,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

// ============================================================================
// Entity
// ============================================================================

/// A declared entity of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Network(NetworkBlock),
    Subnet(Subnet),
    SecurityGroup(SecurityGroup),
    Role(IdentityRole),
    Compute(ComputeNode),
    Environment(ManagedEnvironment),
    SearchCluster(SearchCluster),
}

/// A named reference from one entity to another. `expected` is `None` for
/// untyped `depends_on` edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference<'a> {
    pub target: &'a str,
    pub expected: Option<EntityKind>,
}

impl<'a> Reference<'a> {
    fn typed(target: &'a str, kind: EntityKind) -> Self {
        Self {
            target,
            expected: Some(kind),
        }
    }
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Self::Network(e) => &e.name,
            Self::Subnet(e) => &e.name,
            Self::SecurityGroup(e) => &e.name,
            Self::Role(e) => &e.name,
            Self::Compute(e) => &e.name,
            Self::Environment(e) => &e.name,
            Self::SearchCluster(e) => &e.name,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Network(_) => EntityKind::Network,
            Self::Subnet(_) => EntityKind::Subnet,
            Self::SecurityGroup(_) => EntityKind::SecurityGroup,
            Self::Role(_) => EntityKind::Role,
            Self::Compute(_) => EntityKind::Compute,
            Self::Environment(_) => EntityKind::Environment,
            Self::SearchCluster(_) => EntityKind::SearchCluster,
        }
    }

    fn explicit_depends_on(&self) -> &[String] {
        match self {
            Self::Network(e) => &e.depends_on,
            Self::Subnet(e) => &e.depends_on,
            Self::SecurityGroup(e) => &e.depends_on,
            Self::Role(e) => &e.depends_on,
            Self::Compute(e) => &e.depends_on,
            Self::Environment(e) => &e.depends_on,
            Self::SearchCluster(e) => &e.depends_on,
        }
    }

    /// All outgoing references: typed ones first, then `depends_on`.
    pub fn references(&self) -> Vec<Reference<'_>> {
        let mut refs = Vec::new();
        match self {
            Self::Network(_) | Self::Role(_) => {}
            Self::Subnet(s) => refs.push(Reference::typed(&s.network, EntityKind::Network)),
            Self::SecurityGroup(g) => {
                refs.push(Reference::typed(&g.network, EntityKind::Network));
                for peer in g.peer_groups() {
                    if peer != g.name {
                        refs.push(Reference::typed(peer, EntityKind::SecurityGroup));
                    }
                }
            }
            Self::Compute(c) => {
                refs.push(Reference::typed(&c.network, EntityKind::Network));
                refs.push(Reference::typed(&c.subnet, EntityKind::Subnet));
                for sg in &c.security_groups {
                    refs.push(Reference::typed(sg, EntityKind::SecurityGroup));
                }
                if let Some(ref role) = c.role {
                    refs.push(Reference::typed(role, EntityKind::Role));
                }
            }
            Self::Environment(e) => refs.push(Reference::typed(&e.subnet, EntityKind::Subnet)),
            Self::SearchCluster(s) => {
                refs.push(Reference::typed(&s.network, EntityKind::Network));
                for subnet in &s.subnets {
                    refs.push(Reference::typed(subnet, EntityKind::Subnet));
                }
                for sg in &s.security_groups {
                    refs.push(Reference::typed(sg, EntityKind::SecurityGroup));
                }
            }
        }
        for dep in self.explicit_depends_on() {
            refs.push(Reference {
                target: dep,
                expected: None,
            });
        }
        refs
    }

    /// Distinct dependency names, in first-reference order.
    pub fn dependency_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for r in self.references() {
            if !names.iter().any(|n| n == r.target) {
                names.push(r.target.to_string());
            }
        }
        names
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action the plan expects the provider to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// Non-blocking finding raised during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanWarning {
    pub entity: String,
    pub code: String,
    pub message: String,
}

/// One entity in creation order, with resolved references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedEntity {
    pub position: usize,
    pub entity: Entity,
    /// Entities that must exist before this one
    pub dependencies: Vec<String>,
    /// BLAKE3 hash of the definition
    pub hash: String,
    pub action: PlanAction,
}

impl PlannedEntity {
    pub fn name(&self) -> &str {
        self.entity.name()
    }

    pub fn kind(&self) -> EntityKind {
        self.entity.kind()
    }
}

/// The exported plan artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub entities: Vec<PlannedEntity>,
    #[serde(default)]
    pub warnings: Vec<PlanWarning>,
    pub to_create: u32,
    pub to_update: u32,
    pub unchanged: u32,
}

impl Plan {
    pub fn get(&self, name: &str) -> Option<&PlannedEntity> {
        self.entities.iter().find(|p| p.name() == name)
    }

    /// Names of planned entities that depend directly on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.entities
            .iter()
            .filter(|p| p.dependencies.iter().any(|d| d == name))
            .map(|p| p.name())
            .collect()
    }
}

// ============================================================================
// Identities and state lock
// ============================================================================

/// Logical identity of a provisioned resource, as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub name: String,
    pub kind: EntityKind,
    pub id: String,
}

/// Lock file persisted by the local provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    pub schema: String,
    pub generated_at: String,
    pub generator: String,
    pub blake3_version: String,
    /// Per-resource state, in creation order
    pub resources: IndexMap<String, ResourceLock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub kind: EntityKind,
    pub id: String,
    pub hash: String,
    #[serde(default)]
    pub applied_at: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}


// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        topology: String,
        run_id: String,
        csenv_version: String,
    },
    ResourceStarted {
        topology: String,
        resource: String,
        kind: EntityKind,
    },
    ResourceConverged {
        topology: String,
        resource: String,
        id: String,
        duration_seconds: f64,
        hash: String,
    },
    ResourceFailed {
        topology: String,
        resource: String,
        error: String,
    },
    ResourceDestroyed {
        topology: String,
        resource: String,
        id: String,
    },
    ApplyCompleted {
        topology: String,
        run_id: String,
        resources_converged: u32,
        resources_failed: u32,
        resources_not_attempted: u32,
        cancelled: bool,
        total_seconds: f64,
    },
    DestroyCompleted {
        topology: String,
        run_id: String,
        resources_destroyed: u32,
        resources_failed: u32,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Tests
// ============================================================================

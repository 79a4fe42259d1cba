//! CE-002: Deployment parameter parsing and input validation.
//!
//! Parses `csenv.yaml` and validates inputs before any planning starts:
//! - `ownerIdentity` is required and must be an IAM ARN
//! - `networkAddressBlock` must be an IPv4 CIDR between /16 and /28
//! - zone counts must fit the available zones
//! - search cluster sizing must be positive

use super::error::PlanError;
use super::types::{CpuType, InstanceSize, RemovalPolicy, SearchInstanceSize, Zone};
use ipnet::Ipv4Net;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// Zone letters available when `availabilityZones` is not given.
const ZONE_LETTERS: &str = "abcdef";

const ARN_PATTERN: &str =
    r"^arn:aws[a-z-]*:(iam|sts)::\d{12}:(user|role|assumed-role)/[A-Za-z0-9+=,.@_/-]+$";

const REGION_PATTERN: &str = r"^[a-z]{2}(-[a-z]+)+-\d$";

static ARN_RE: OnceLock<Option<Regex>> = OnceLock::new();
static REGION_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Deployment parameters. The only input to planning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeploymentParams {
    /// Topology name, used for the plan and the provenance log
    #[serde(default = "default_name")]
    pub name: String,

    /// IAM ARN of the managed environment owner
    pub owner_identity: String,

    /// Extra owners; each gets its own managed environment
    #[serde(default)]
    pub additional_owners: Vec<String>,

    /// Region used to derive zone names
    #[serde(default = "default_region")]
    pub region: String,

    /// Explicit zone names; overrides region-derived names
    #[serde(default)]
    pub availability_zones: Option<Vec<String>>,

    /// Parent CIDR of the network block
    #[serde(default = "default_network_block")]
    pub network_address_block: String,

    /// Number of zones to spread subnets across
    #[serde(default = "default_az_count")]
    pub az_count: u8,

    /// Mask for both public and private subnets
    #[serde(default = "default_subnet_mask")]
    pub subnet_mask: u8,

    #[serde(default = "default_bastion_size")]
    pub instance_size_bastion: InstanceSize,

    #[serde(default = "default_cpu_type")]
    pub bastion_cpu_type: CpuType,

    #[serde(default = "default_environment_size")]
    pub instance_size_environment: InstanceSize,

    /// Idle minutes before the managed environment stops
    #[serde(default)]
    pub environment_auto_stop_minutes: Option<u32>,

    #[serde(default = "default_search_size")]
    pub instance_size_search: SearchInstanceSize,

    /// Dedicated master node size; `null` disables dedicated masters
    #[serde(default = "default_master_size")]
    pub search_master_node_size: Option<SearchInstanceSize>,

    #[serde(default = "default_data_nodes")]
    pub search_data_node_count: u32,

    /// Zones the search cluster spans; more than one enables zone awareness
    #[serde(default = "default_search_zones")]
    pub search_zone_count: u8,

    #[serde(default = "default_engine_version")]
    pub search_engine_version: String,

    #[serde(default)]
    pub search_removal_policy: RemovalPolicy,
}

fn default_name() -> String {
    "csenv".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_network_block() -> String {
    "10.1.0.0/16".to_string()
}

fn default_az_count() -> u8 {
    3
}

fn default_subnet_mask() -> u8 {
    22
}

fn default_bastion_size() -> InstanceSize {
    InstanceSize::T3Medium
}

fn default_cpu_type() -> CpuType {
    CpuType::X86_64
}

fn default_environment_size() -> InstanceSize {
    InstanceSize::T3Large
}

fn default_search_size() -> SearchInstanceSize {
    SearchInstanceSize::M6gLargeSearch
}

fn default_master_size() -> Option<SearchInstanceSize> {
    Some(SearchInstanceSize::M6gLargeSearch)
}

fn default_data_nodes() -> u32 {
    2
}

fn default_search_zones() -> u8 {
    2
}

fn default_engine_version() -> String {
    "OpenSearch_1.0".to_string()
}

impl DeploymentParams {
    /// Parameters with every default and the given owner.
    pub fn with_owner(owner: &str) -> Self {
        Self {
            name: default_name(),
            owner_identity: owner.to_string(),
            additional_owners: Vec::new(),
            region: default_region(),
            availability_zones: None,
            network_address_block: default_network_block(),
            az_count: default_az_count(),
            subnet_mask: default_subnet_mask(),
            instance_size_bastion: default_bastion_size(),
            bastion_cpu_type: default_cpu_type(),
            instance_size_environment: default_environment_size(),
            environment_auto_stop_minutes: None,
            instance_size_search: default_search_size(),
            search_master_node_size: default_master_size(),
            search_data_node_count: default_data_nodes(),
            search_zone_count: default_search_zones(),
            search_engine_version: default_engine_version(),
            search_removal_policy: RemovalPolicy::default(),
        }
    }

    /// Parsed network block. Call after validation.
    pub fn network_cidr(&self) -> Result<Ipv4Net, PlanError> {
        self.network_address_block
            .parse::<Ipv4Net>()
            .map_err(|e| PlanError::input("networkAddressBlock", e.to_string()))
    }

    /// All zones that could be used, in order.
    pub fn available_zones(&self) -> Vec<String> {
        match self.availability_zones {
            Some(ref zones) => zones.clone(),
            None => ZONE_LETTERS
                .chars()
                .map(|c| format!("{}{}", self.region, c))
                .collect(),
        }
    }

    /// The first `azCount` zones.
    pub fn zones(&self) -> Vec<Zone> {
        self.available_zones()
            .into_iter()
            .take(usize::from(self.az_count))
            .enumerate()
            .map(|(i, name)| Zone {
                index: i as u8,
                name,
            })
            .collect()
    }

    /// Owners in declaration order, primary first.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.owner_identity.as_str())
            .chain(self.additional_owners.iter().map(String::as_str))
    }
}

/// Parse a parameter file from disk.
pub fn parse_params_file(path: &Path) -> Result<DeploymentParams, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_params(&content)
}

/// Parse parameters from a YAML string.
pub fn parse_params(yaml: &str) -> Result<DeploymentParams, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate parameters. Returns every problem found (empty = valid).
pub fn validate_params(params: &DeploymentParams) -> Vec<PlanError> {
    let mut errors = Vec::new();

    if params.name.trim().is_empty() {
        errors.push(PlanError::input("name", "must not be empty"));
    }

    if params.owner_identity.trim().is_empty() {
        errors.push(PlanError::input("ownerIdentity", "is required"));
    } else if !is_arn(&params.owner_identity) {
        errors.push(PlanError::input(
            "ownerIdentity",
            format!("'{}' is not an IAM ARN", params.owner_identity),
        ));
    }
    for (i, owner) in params.additional_owners.iter().enumerate() {
        if !is_arn(owner) {
            errors.push(PlanError::input(
                &format!("additionalOwners[{}]", i),
                format!("'{}' is not an IAM ARN", owner),
            ));
        }
        if params.owners().filter(|o| *o == owner.as_str()).count() > 1 {
            errors.push(PlanError::input(
                &format!("additionalOwners[{}]", i),
                format!("'{}' is listed more than once", owner),
            ));
        }
    }

    match params.network_address_block.parse::<Ipv4Net>() {
        Ok(net) if !(16..=28).contains(&net.prefix_len()) => errors.push(PlanError::input(
            "networkAddressBlock",
            format!("prefix /{} must be between /16 and /28", net.prefix_len()),
        )),
        Ok(net) if net.trunc() != net => errors.push(PlanError::input(
            "networkAddressBlock",
            format!("{} has host bits set; did you mean {}?", net, net.trunc()),
        )),
        Ok(_) => {}
        Err(e) => errors.push(PlanError::input(
            "networkAddressBlock",
            format!("'{}': {}", params.network_address_block, e),
        )),
    }

    if params.availability_zones.is_none()
        && !pattern_matches(&REGION_RE, REGION_PATTERN, &params.region)
    {
        errors.push(PlanError::input(
            "region",
            format!("'{}' is not a region name", params.region),
        ));
    }
    if let Some(ref zones) = params.availability_zones {
        let mut seen = HashSet::new();
        for (i, zone) in zones.iter().enumerate() {
            if zone.trim().is_empty() {
                errors.push(PlanError::input(
                    &format!("availabilityZones[{}]", i),
                    "must not be empty",
                ));
            } else if !seen.insert(zone.as_str()) {
                errors.push(PlanError::input(
                    &format!("availabilityZones[{}]", i),
                    format!("'{}' is listed more than once", zone),
                ));
            }
        }
    }

    let available = params.available_zones().len();
    if params.az_count == 0 {
        errors.push(PlanError::input("azCount", "must be at least 1"));
    } else if usize::from(params.az_count) > available {
        errors.push(PlanError::input(
            "azCount",
            format!("{} exceeds the {} available zones", params.az_count, available),
        ));
    }

    if params.search_data_node_count == 0 {
        errors.push(PlanError::input("searchDataNodeCount", "must be at least 1"));
    } else if params.search_data_node_count % 2 != 0 {
        errors.push(PlanError::input(
            "searchDataNodeCount",
            format!("{} is not an even number", params.search_data_node_count),
        ));
    }
    if !(1..=3).contains(&params.search_zone_count) {
        errors.push(PlanError::input("searchZoneCount", "must be 1, 2, or 3"));
    } else if params.search_zone_count > params.az_count {
        errors.push(PlanError::input(
            "searchZoneCount",
            format!(
                "{} exceeds azCount {}",
                params.search_zone_count, params.az_count
            ),
        ));
    }
    if params.search_engine_version.trim().is_empty() {
        errors.push(PlanError::input("searchEngineVersion", "must not be empty"));
    }

    if let Some(minutes) = params.environment_auto_stop_minutes {
        if !(30..=20160).contains(&minutes) {
            errors.push(PlanError::input(
                "environmentAutoStopMinutes",
                "must be between 30 and 20160",
            ));
        }
    }

    errors
}

/// Validate and return the first problem, if any.
pub fn check_params(params: &DeploymentParams) -> Result<(), PlanError> {
    match validate_params(params).into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// JSON schema of the parameter file.
pub fn params_schema() -> Result<String, String> {
    let schema = schemars::schema_for!(DeploymentParams);
    serde_json::to_string_pretty(&schema).map_err(|e| format!("schema serialize error: {}", e))
}

fn is_arn(s: &str) -> bool {
    pattern_matches(&ARN_RE, ARN_PATTERN, s)
}

/// Match against a pattern compiled once per process.
fn pattern_matches(cell: &OnceLock<Option<Regex>>, pattern: &str, s: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "arn:aws:iam::123456789012:user/alice";

    fn has_field(errors: &[PlanError], field: &str) -> bool {
        errors.iter().any(|e| match e {
            PlanError::InputValidation { field: f, .. } => f == field,
            _ => false,
        })
    }

    #[test]
    fn test_ce002_parse_defaults() {
        let params = parse_params(&format!("ownerIdentity: {}\n", OWNER)).unwrap();
        assert_eq!(params.network_address_block, "10.1.0.0/16");
        assert_eq!(params.az_count, 3);
        assert_eq!(params.search_data_node_count, 2);
        assert_eq!(params.search_zone_count, 2);
        assert_eq!(params.instance_size_bastion, InstanceSize::T3Medium);
        assert_eq!(params.instance_size_search, SearchInstanceSize::M6gLargeSearch);
        assert!(validate_params(&params).is_empty());
    }

    #[test]
    fn test_ce002_parse_full() {
        let yaml = r#"
name: lab
ownerIdentity: arn:aws:iam::123456789012:user/alice
additionalOwners: [arn:aws:iam::123456789012:user/bob]
region: eu-west-1
networkAddressBlock: 10.20.0.0/16
azCount: 2
subnetMask: 24
instanceSizeBastion: t3.small
instanceSizeSearch: r6g.large.search
searchMasterNodeSize: null
searchDataNodeCount: 4
searchZoneCount: 2
environmentAutoStopMinutes: 60
searchRemovalPolicy: retain
"#;
        let params = parse_params(yaml).unwrap();
        assert_eq!(params.name, "lab");
        assert_eq!(params.owners().count(), 2);
        assert_eq!(params.search_master_node_size, None);
        assert_eq!(params.search_removal_policy, RemovalPolicy::Retain);
        let zones = params.zones();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[1].name, "eu-west-1b");
        assert!(validate_params(&params).is_empty());
    }

    #[test]
    fn test_ce002_missing_owner_is_parse_error() {
        let result = parse_params("azCount: 2\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("ownerIdentity"));
    }

    #[test]
    fn test_ce002_unknown_field_rejected() {
        let result = parse_params(&format!("ownerIdentity: {}\nazcount: 2\n", OWNER));
        assert!(result.is_err());
    }

    #[test]
    fn test_ce002_bad_owner() {
        let params = DeploymentParams::with_owner("alice");
        let errors = validate_params(&params);
        assert!(has_field(&errors, "ownerIdentity"));
        let params = DeploymentParams::with_owner("  ");
        assert!(has_field(&validate_params(&params), "ownerIdentity"));
    }

    #[test]
    fn test_ce002_duplicate_additional_owner() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.additional_owners = vec![OWNER.to_string()];
        assert!(has_field(&validate_params(&params), "additionalOwners[0]"));
    }

    #[test]
    fn test_ce002_bad_cidr() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.network_address_block = "10.1.0.0".to_string();
        assert!(has_field(&validate_params(&params), "networkAddressBlock"));
        params.network_address_block = "10.0.0.0/8".to_string();
        assert!(has_field(&validate_params(&params), "networkAddressBlock"));
        params.network_address_block = "10.1.2.0/16".to_string();
        assert!(has_field(&validate_params(&params), "networkAddressBlock"));
    }

    #[test]
    fn test_ce002_az_count_bounds() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.az_count = 0;
        assert!(has_field(&validate_params(&params), "azCount"));
        params.az_count = 7;
        assert!(has_field(&validate_params(&params), "azCount"));
        params.az_count = 2;
        params.availability_zones = Some(vec!["z1".into()]);
        assert!(has_field(&validate_params(&params), "azCount"));
    }

    #[test]
    fn test_ce002_explicit_zones_skip_region_check() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.region = "nowhere".to_string();
        assert!(has_field(&validate_params(&params), "region"));
        params.availability_zones = Some(vec!["z1".into(), "z2".into(), "z3".into()]);
        assert!(validate_params(&params).is_empty());
        assert_eq!(params.zones()[2].name, "z3");
    }

    #[test]
    fn test_ce002_duplicate_zone_names() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.availability_zones = Some(vec!["z1".into(), "z2".into(), "z1".into()]);
        let errors = validate_params(&params);
        assert!(has_field(&errors, "availabilityZones[2]"));
        assert!(!has_field(&errors, "availabilityZones[0]"));
        assert!(check_params(&params).is_err());
    }

    #[test]
    fn test_ce002_search_zone_count() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.search_zone_count = 4;
        assert!(has_field(&validate_params(&params), "searchZoneCount"));
        params.search_zone_count = 3;
        params.az_count = 2;
        assert!(has_field(&validate_params(&params), "searchZoneCount"));
    }

    #[test]
    fn test_ce002_odd_data_nodes_rejected() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.search_zone_count = 1;
        params.search_data_node_count = 3;
        let err = check_params(&params).unwrap_err();
        assert!(matches!(
            err,
            PlanError::InputValidation { ref field, .. } if field == "searchDataNodeCount"
        ));
        params.search_data_node_count = 4;
        assert!(validate_params(&params).is_empty());
    }

    #[test]
    fn test_ce002_data_nodes_and_auto_stop() {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.search_data_node_count = 0;
        params.environment_auto_stop_minutes = Some(5);
        let errors = validate_params(&params);
        assert!(has_field(&errors, "searchDataNodeCount"));
        assert!(has_field(&errors, "environmentAutoStopMinutes"));
        assert!(check_params(&params).is_err());
    }

    #[test]
    fn test_ce002_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("csenv.yaml");
        std::fs::write(&path, format!("ownerIdentity: {}\nazCount: 2\n", OWNER)).unwrap();
        let params = parse_params_file(&path).unwrap();
        assert_eq!(params.az_count, 2);
    }

    #[test]
    fn test_ce002_schema() {
        let schema = params_schema().unwrap();
        assert!(schema.contains("ownerIdentity"));
        assert!(schema.contains("searchDataNodeCount"));
    }
}

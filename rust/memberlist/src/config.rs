use serde::Deserialize;

/// Where the maintenance nodes register themselves.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SelfServiceMemberlistConfig {
    pub namespace: String,
    pub service: String,
}

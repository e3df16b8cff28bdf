//! Export configuration.
//!
//! All tables the run depends on (queries, column mappings, additional
//! columns, filename templates) live in [`ExportConfig`], which is built once
//! at startup and handed to the controller and assembler. Nothing is looked
//! up from global state during a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default async API version.
pub const DEFAULT_API_VERSION: &str = "60.0";

/// Header carrying the session id on every request.
pub const DEFAULT_AUTH_HEADER_NAME: &str = "X-SFDC-Session";

/// Placeholder in a query replaced by the execute-time cut-off.
pub const EXECUTE_TIME_PLACEHOLDER: &str = "<EXECUTE_TIME>";

/// Cut-off used by the built-in Asset query when none is given.
pub const DEFAULT_EXECUTE_TIME: &str = "2024-02-19T22:00:00Z";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Content type the job produces its results in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataFormat {
    #[default]
    Csv,
    Json,
    Xml,
}

impl DataFormat {
    /// Value sent in the `contentType` element of the job creation body.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "CSV",
            DataFormat::Json => "JSON",
            DataFormat::Xml => "XML",
        }
    }
}

/// Fixed-interval polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Everything the export needs to know about one subject type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectProfile {
    /// SOQL submitted as the job's single batch.
    pub query: String,
    /// Output filename with `<FILE_SUFFIX>` and `<JOB_ID>` placeholders.
    pub file_name_template: String,
    /// Raw column token → display column token, applied in order.
    #[serde(default)]
    pub column_mapping: Vec<(String, String)>,
    /// New column name → constant value appended to every row, in order.
    #[serde(default)]
    pub additional_columns: Vec<(String, String)>,
}

/// Top-level export configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub api_version: String,
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
    /// Overrides the attempt ceiling derived from `max_wait_secs`.
    pub max_attempts: Option<u32>,
    pub result_fetch_delay_secs: u64,
    pub auth_header_name: String,
    pub report_tag: String,
    pub data_format: DataFormat,
    pub pk_chunking: bool,
    pub output_dir: PathBuf,
    /// Replaces the built-in subjects entirely when present in a config file.
    pub subjects: BTreeMap<String, SubjectProfile>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            poll_interval_secs: 3,
            max_wait_secs: 2 * 60,
            max_attempts: None,
            result_fetch_delay_secs: 3,
            auth_header_name: DEFAULT_AUTH_HEADER_NAME.to_string(),
            report_tag: "ESMEE".to_string(),
            data_format: DataFormat::Csv,
            pk_chunking: true,
            output_dir: PathBuf::from("."),
            subjects: builtin_subjects(),
        }
    }
}

impl ExportConfig {
    /// Loads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ExportConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make the run meaningless.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_interval_secs == 0 && self.max_attempts.is_none() {
            return Err(AppError::Config(
                "poll_interval_secs must be positive unless max_attempts is set".into(),
            ));
        }
        if self.auth_header_name.trim().is_empty() {
            return Err(AppError::Config("auth_header_name must not be empty".into()));
        }
        for (subject, profile) in &self.subjects {
            if profile.query.trim().is_empty() {
                return Err(AppError::Config(format!("Subject {} has an empty query", subject)));
            }
            if profile.file_name_template.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "Subject {} has an empty file name template",
                    subject
                )));
            }
        }
        Ok(())
    }

    /// Returns the profile for a subject type.
    pub fn profile(&self, subject: &str) -> Result<&SubjectProfile, AppError> {
        self.subjects.get(subject).ok_or_else(|| {
            let known: Vec<&str> = self.subjects.keys().map(String::as_str).collect();
            AppError::Config(format!(
                "Unknown subject type '{}' (known: {})",
                subject,
                known.join(", ")
            ))
        })
    }

    /// Polling policy: fixed interval, ceiling = total budget / interval.
    pub fn poll_policy(&self) -> PollPolicy {
        let derived = if self.poll_interval_secs == 0 {
            1
        } else {
            (self.max_wait_secs / self.poll_interval_secs).max(1)
        };
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs),
            max_attempts: self
                .max_attempts
                .unwrap_or_else(|| u32::try_from(derived).unwrap_or(u32::MAX)),
        }
    }

    pub fn result_fetch_delay(&self) -> Duration {
        Duration::from_secs(self.result_fetch_delay_secs)
    }
}

impl SubjectProfile {
    /// Query text with the execute-time placeholder substituted.
    pub fn render_query(&self, execute_time: &str) -> String {
        self.query.replace(EXECUTE_TIME_PLACEHOLDER, execute_time)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in subjects
// ─────────────────────────────────────────────────────────────────────────────

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Subjects shipped with the tool.
pub fn builtin_subjects() -> BTreeMap<String, SubjectProfile> {
    let mut subjects = BTreeMap::new();

    subjects.insert(
        "Asset".to_string(),
        SubjectProfile {
            query: "SELECT Account.KRN_ID__c, vlocity_cmt__ContractId__r.EnterpriseServiceId__c, \
                    vlocity_cmt__ContractId__r.IRMA_Customer_ID__c, Id, External_System_Id__c, \
                    vlocity_cmt__RecurringTotal__c, vlocity_cmt__OneTimeTotal__c, \
                    Product2.ProductCode, Product2.Name, Product2.Family, Product2.Promis_Code__c, \
                    InstallDate, Quantity, ExternalInterfaceId__c, PropositionType__c FROM Asset \
                    where vlocity_cmt__ProvisioningStatus__c = 'Active' and \
                    (BillingEndDate__c = null or BillingEndDate__c >= <EXECUTE_TIME>)"
                .to_string(),
            file_name_template: "ESMEE_RABBIT_DATA_<FILE_SUFFIX>_<JOB_ID>.csv".to_string(),
            column_mapping: pairs(&[
                ("\"Account.KRN_ID__c\"", "\"CUSTOMER ID\""),
                (
                    "\"vlocity_cmt__ContractId__r.EnterpriseServiceId__c\"",
                    "\"CONTRACT ID\"",
                ),
                (
                    "\"vlocity_cmt__ContractId__r.IRMA_Customer_ID__c\"",
                    "\"IRMA CUSTOMER ID\"",
                ),
                ("\"Id\"", "\"ASSET ID\""),
                ("\"External_System_Id__c\"", "\"ROUTIT ORDER ID\""),
                ("\"vlocity_cmt__RecurringTotal__c\"", "\"RECCURING COST\""),
                ("\"vlocity_cmt__OneTimeTotal__c\"", "\"ONE TIME COST\""),
                ("\"Product2.ProductCode\"", "\"PRODUCT CODE\""),
                ("\"Product2.Name\"", "\"PRODUCT NAME\""),
                ("\"Product2.Family\"", "\"PRODUCT FAMILY\""),
                ("\"Product2.Promis_Code__c\"", "\"PROMIS CODE\""),
                ("\"InstallDate\"", "\"ACTIVATION DATE\""),
                ("\"Quantity\"", "\"QUANTITY\""),
                ("\"ExternalInterfaceId__c\"", "\"EXTERNAL INTERFACE ID\""),
                ("\"PropositionType__c\"", "\"PORTFOLIO ID\""),
            ]),
            additional_columns: pairs(&[("PARTNER ID", "67490")]),
        },
    );

    subjects.insert(
        "BIL_Identifier_Mapping__c".to_string(),
        SubjectProfile {
            query: "SELECT Asset__r.Account.KRN_ID__c, Asset__r.ExternalInterfaceId__c, \
                    Asset__r.vlocity_cmt__LineNumber__c, AssetEffectiveQuantity__c, Asset__r.Name, \
                    Asset__r.vlocity_cmt__ProvisioningStatus__c, Asset__r.Product2.ProductCode, \
                    Asset__r.Service_ID__c, Asset__r.PropositionType__c, ESMEE_Id__c, \
                    Asset__r.BillingStartDate__c, Asset__r.BillingEndDate__c \
                    FROM BIL_Identifier_Mapping__c"
                .to_string(),
            file_name_template: "ESMEE_RABBIT_BILLINGDATA_<FILE_SUFFIX>_<JOB_ID>.csv".to_string(),
            column_mapping: pairs(&[
                ("\"Asset__r.Account.KRN_ID__c\"", "\"KRN\""),
                ("\"Asset__r.ExternalInterfaceId__c\"", "\"EXTERNAL INTERFACE ID\""),
                ("\"Asset__r.vlocity_cmt__LineNumber__c\"", "\"LINE NUMBER\""),
                ("\"Asset__r.Name\"", "\"PRODUCT NAME\""),
                ("\"Asset__r.vlocity_cmt__ProvisioningStatus__c\"", "\"ASSET STATUS\""),
                ("\"Asset__r.Product2.ProductCode\"", "\"PRODUCT CODE\""),
                ("\"Asset__r.Service_ID__c\"", "\"SERVICE ID\""),
                ("\"Asset__r.PropositionType__c\"", "\"PROPOSITION\""),
                ("\"Asset__r.BillingStartDate__c\"", "\"ACTIVATION DATE\""),
                ("\"Asset__r.BillingEndDate__c\"", "\"DEACTIVATION DATE\""),
                ("\"AssetEffectiveQuantity__c\"", "\"QUANTITY\""),
                ("\"ESMEE_Id__c\"", "\"CHARGE ID\""),
            ]),
            additional_columns: Vec::new(),
        },
    );

    subjects
}

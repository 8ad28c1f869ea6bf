//! Target schemas for extraction output.
//!
//! Two fixed variants exist: a flat schema with plain string leaves, and a
//! confidence-annotated schema where every leaf is `{value, confidence}`.
//! The variant is chosen per deployment in `PipelineConfig`. Skeletons are
//! compile-time JSON literals; the prompt embeds them verbatim and the
//! fallback document is built from them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::ExtractionDocument;

/// Marker key set on fallback documents of the flat variant.
pub const EXTRACTION_ERROR_KEY: &str = "extraction_error";

/// Message recorded in the fallback marker.
pub const FALLBACK_MESSAGE: &str = "Failed to parse model output";

/// Flat skeleton: every key present, empty-string leaves, empty coverage list.
pub const FLAT_SKELETON: &str = concat!(
    r#"{"policy_number":"","#,
    r#""effective_dates":{"start":"","end":""},"#,
    r#""policyholder_details":{"full_name":"","address":"","city_state_zip":"","phone":"","email":"","dob":"","gender":"","marital_status":""},"#,
    r#""policy_information":{"policy_type":"","issue_date":"","term_length":"","renewal_date":"","agent":"","agent_id":"","office_phone":""},"#,
    r#""insured_vehicle":{"year":"","make":"","model":"","vin":"","license_plate":"","body_type":"","usage_class":"","mileage":"","garage_zip":""},"#,
    r#""driver_profile":{"primary_driver_name":"","license_no":"","license_date":"","license_status":"","age_group":"","driving_record":"","relationship":""},"#,
    r#""coverage_limits_and_deductibles":[],"#,
    r#""discounts_applied":{"good_driver":"","multi_policy":"","vehicle_safety":"","federal_employee":"","total_savings":""},"#,
    r#""billing_information":{"payment_method":"","payment_plan":"","monthly_amount":"","next_due_date":"","bank_account":""}}"#
);

/// Confidence-annotated skeleton: every leaf is `{"value":"","confidence":""}`.
pub const ANNOTATED_SKELETON: &str = r#"{
  "document_metadata": {"filename": "", "extraction_timestamp": "", "document_language": "", "document_type": "auto_insurance_policy"},
  "confidence_assessment": {
    "overall_confidence": "",
    "field_confidence": {"policy_holder": "", "policy_info": "", "vehicle": "", "coverage": "", "billing": ""}
  },
  "policy_holder": {
    "full_name": {"value": "", "confidence": ""},
    "address": {
      "street": {"value": "", "confidence": ""},
      "city": {"value": "", "confidence": ""},
      "state": {"value": "", "confidence": ""},
      "zip_code": {"value": "", "confidence": ""}
    },
    "phone": {"value": "", "confidence": ""},
    "email": {"value": "", "confidence": ""},
    "date_of_birth": {"value": "", "confidence": ""},
    "gender": {"value": "", "confidence": ""},
    "marital_status": {"value": "", "confidence": ""}
  },
  "policy_information": {
    "policy_number": {"value": "", "confidence": ""},
    "effective_date": {"value": "", "confidence": ""},
    "expiration_date": {"value": "", "confidence": ""},
    "policy_term": {"value": "", "confidence": ""},
    "policy_type": {"value": "", "confidence": ""},
    "issue_date": {"value": "", "confidence": ""},
    "renewal_date": {"value": "", "confidence": ""},
    "agent_name": {"value": "", "confidence": ""},
    "agent_id": {"value": "", "confidence": ""},
    "insurance_company": {"value": "", "confidence": ""}
  },
  "vehicle_information": {
    "year_make_model": {"value": "", "confidence": ""},
    "vin": {"value": "", "confidence": ""},
    "license_plate": {"value": "", "confidence": ""},
    "body_type": {"value": "", "confidence": ""},
    "usage_class": {"value": "", "confidence": ""},
    "annual_mileage": {"value": "", "confidence": ""},
    "garaging_zip": {"value": "", "confidence": ""}
  },
  "driver_information": {
    "primary_driver_name": {"value": "", "confidence": ""},
    "license_number": {"value": "", "confidence": ""},
    "license_status": {"value": "", "confidence": ""},
    "driving_record": {"value": "", "confidence": ""}
  },
  "coverage_details": {
    "bodily_injury_liability": {
      "limit": {"value": "", "confidence": ""},
      "premium": {"value": "", "confidence": ""}
    },
    "property_damage_liability": {
      "limit": {"value": "", "confidence": ""},
      "premium": {"value": "", "confidence": ""}
    },
    "collision": {
      "deductible": {"value": "", "confidence": ""},
      "premium": {"value": "", "confidence": ""}
    },
    "comprehensive": {
      "deductible": {"value": "", "confidence": ""},
      "premium": {"value": "", "confidence": ""}
    }
  },
  "billing_information": {
    "payment_method": {"value": "", "confidence": ""},
    "payment_plan": {"value": "", "confidence": ""},
    "monthly_payment": {"value": "", "confidence": ""},
    "total_premium": {"value": "", "confidence": ""},
    "next_due_date": {"value": "", "confidence": ""},
    "discounts_applied": {
      "total_discounts": {"value": "", "confidence": ""}
    }
  }
}"#;

/// Which target schema the deployment extracts into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVariant {
    /// Plain string leaves.
    #[default]
    Flat,
    /// Every leaf is `{value, confidence}`.
    Annotated,
}

impl SchemaVariant {
    /// The literal JSON skeleton embedded in prompts.
    pub fn skeleton_json(self) -> &'static str {
        match self {
            SchemaVariant::Flat => FLAT_SKELETON,
            SchemaVariant::Annotated => ANNOTATED_SKELETON,
        }
    }

    /// The skeleton parsed into a document.
    pub fn skeleton(self) -> ExtractionDocument {
        // Both literals are checked by tests; an empty document is never observed.
        serde_json::from_str(self.skeleton_json()).unwrap_or_default()
    }

    /// Top-level keys guaranteed present in every normalised document.
    pub fn declared_keys(self) -> Vec<String> {
        self.skeleton().keys().cloned().collect()
    }

    /// Schema-complete document with empty leaves and an explicit failure marker.
    pub fn fallback_document(self, reason: &str) -> ExtractionDocument {
        let mut document = self.skeleton();
        match self {
            SchemaVariant::Flat => {
                document.insert(EXTRACTION_ERROR_KEY, Value::String(reason.to_string()));
            }
            SchemaVariant::Annotated => {
                document.insert(
                    "confidence_assessment",
                    json!({
                        "overall_confidence": "low",
                        "extraction_error": reason,
                    }),
                );
            }
        }
        document
    }

    /// Short label used in metadata and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaVariant::Flat => "flat",
            SchemaVariant::Annotated => "annotated",
        }
    }
}

impl std::str::FromStr for SchemaVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(SchemaVariant::Flat),
            "annotated" | "confidence" => Ok(SchemaVariant::Annotated),
            other => Err(format!("unknown schema variant '{other}' (expected flat or annotated)")),
        }
    }
}

/// Whether a document carries the fallback marker of either variant.
pub fn is_fallback_document(document: &ExtractionDocument) -> bool {
    document.contains_key(EXTRACTION_ERROR_KEY)
        || document
            .pointer("confidence_assessment.extraction_error")
            .is_some()
}

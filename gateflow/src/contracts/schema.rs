//! Schema contracts and their validation.
//!
//! Each stage output type derives its JSON schema through `schemars`. The
//! schema is compiled once per gate and every violation is reported, so the
//! model sees all the fields it got wrong in one retry.

use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::primitive_type::PrimitiveType;
use jsonschema::JSONSchema;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

use crate::contracts::errors::{ContractViolation, IssueCategory, SchemaIssue};
use crate::contracts::models::{
    BusinessAnalysis, ConfidentialityTest, EnrichedMetadata, Queries, Visualizations,
};
use crate::errors::{GateflowError, Result};

/// Plotting code attached to a sub-analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisualizationPlan {
    /// Code lines.
    pub code: Vec<String>,
    /// Chart type the model chose.
    pub visualization_type: String,
    /// Why it chose it.
    pub justification: String,
}

/// One sub-analysis with the code the gate must run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAnalysisPlan {
    /// Sub-analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Why it is valuable.
    pub why: String,
    /// Questions it answers.
    pub answers: Vec<String>,
    /// Required tables and columns.
    pub tables_columns: Vec<String>,
    /// Analysis type.
    pub analysis_type: String,
    /// Query code lines.
    pub code_lines: Vec<String>,
    /// Plotting code, for stages that render charts.
    pub visualization: Option<VisualizationPlan>,
}

/// One analysis with its executable sub-analyses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPlan {
    /// Analysis id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Business context.
    pub context: String,
    /// Tables involved.
    pub tables: Vec<String>,
    /// Sub-analyses in document order.
    pub items: Vec<SubAnalysisPlan>,
}

/// A stage output contract.
pub trait StageSchema:
    Serialize + DeserializeOwned + JsonSchema + Send + Sync + 'static
{
    /// Contract name, used in logs.
    const CONTRACT: &'static str;

    /// The code this output carries, in document order.
    fn code_plan(&self) -> Vec<AnalysisPlan> {
        Vec::new()
    }
}

impl StageSchema for EnrichedMetadata {
    const CONTRACT: &'static str = "enriched_metadata";
}

impl StageSchema for BusinessAnalysis {
    const CONTRACT: &'static str = "business_analysis";
}

impl StageSchema for ConfidentialityTest {
    const CONTRACT: &'static str = "confidentiality_test";
}

impl StageSchema for Queries {
    const CONTRACT: &'static str = "queries";

    fn code_plan(&self) -> Vec<AnalysisPlan> {
        self.analyses
            .iter()
            .map(|a| AnalysisPlan {
                id: a.id.clone(),
                title: a.title.clone(),
                context: a.context.clone(),
                tables: a.tables.clone(),
                items: a
                    .sub_analyses
                    .iter()
                    .map(|s| SubAnalysisPlan {
                        id: s.id.clone(),
                        title: s.title.clone(),
                        why: s.why.clone(),
                        answers: s.answers.clone(),
                        tables_columns: s.tables_columns.clone(),
                        analysis_type: s.analysis_type.clone(),
                        code_lines: s.code_lines.clone(),
                        visualization: None,
                    })
                    .collect(),
            })
            .collect()
    }
}

impl StageSchema for Visualizations {
    const CONTRACT: &'static str = "visualizations";

    fn code_plan(&self) -> Vec<AnalysisPlan> {
        self.analyses
            .iter()
            .map(|a| AnalysisPlan {
                id: a.id.clone(),
                title: a.title.clone(),
                context: a.context.clone(),
                tables: a.tables.clone(),
                items: a
                    .sub_analyses
                    .iter()
                    .map(|s| SubAnalysisPlan {
                        id: s.id.clone(),
                        title: s.title.clone(),
                        why: s.why.clone(),
                        answers: s.answers.clone(),
                        tables_columns: s.tables_columns.clone(),
                        analysis_type: s.analysis_type.clone(),
                        code_lines: s.code_lines.clone(),
                        visualization: Some(VisualizationPlan {
                            code: s.visualization_code.clone(),
                            visualization_type: s.visualization_type.clone(),
                            justification: s.justification.clone(),
                        }),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Compiled validator for one stage contract.
pub struct SchemaValidator<S> {
    compiled: JSONSchema,
    _schema: PhantomData<fn() -> S>,
}

impl<S> fmt::Debug for SchemaValidator<S>
where
    S: StageSchema,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("contract", &S::CONTRACT)
            .finish_non_exhaustive()
    }
}

impl<S: StageSchema> SchemaValidator<S> {
    /// Compiles the JSON schema derived from `S`.
    pub fn new() -> Result<Self> {
        let schema = serde_json::to_value(schemars::schema_for!(S))?;
        let compiled = JSONSchema::compile(&schema).map_err(|e| {
            GateflowError::Config(format!("invalid schema for {}: {e}", S::CONTRACT))
        })?;
        Ok(Self {
            compiled,
            _schema: PhantomData,
        })
    }

    /// Parses raw model text into a typed value.
    pub fn parse(&self, raw: &str) -> std::result::Result<S, ContractViolation> {
        let value: Value = serde_json::from_str(raw).map_err(|e| ContractViolation::malformed(&e))?;
        self.validate(value)
    }

    /// Validates already parsed JSON and converts it.
    pub fn validate(&self, value: Value) -> std::result::Result<S, ContractViolation> {
        let issues = self.issues(&value);
        if !issues.is_empty() {
            return Err(ContractViolation::Schema(issues));
        }
        serde_json::from_value(value).map_err(|e| {
            ContractViolation::Schema(vec![SchemaIssue::new(
                Vec::new(),
                IssueCategory::InvalidValue,
                e.to_string(),
            )])
        })
    }

    /// Every schema violation in `value`, in validator order.
    pub fn issues(&self, value: &Value) -> Vec<SchemaIssue> {
        match self.compiled.validate(value) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|err| {
                    let mut path = pointer_segments(&err.instance_path.to_string());
                    let category = match &err.kind {
                        ValidationErrorKind::Required { property } => {
                            path.push(property.as_str().map_or_else(|| property.to_string(), str::to_string));
                            IssueCategory::Missing
                        }
                        ValidationErrorKind::Type { kind } => type_category(kind),
                        _ => IssueCategory::InvalidValue,
                    };
                    SchemaIssue::new(path, category, err.to_string())
                })
                .collect(),
        }
    }
}

fn type_category(kind: &TypeKind) -> IssueCategory {
    match kind {
        TypeKind::Single(PrimitiveType::String) => IssueCategory::StringType,
        TypeKind::Single(PrimitiveType::Integer) => IssueCategory::IntType,
        TypeKind::Single(PrimitiveType::Number) => IssueCategory::NumberType,
        TypeKind::Single(PrimitiveType::Boolean) => IssueCategory::BoolType,
        TypeKind::Single(PrimitiveType::Array) => IssueCategory::ListType,
        TypeKind::Single(PrimitiveType::Object) => IssueCategory::DictType,
        TypeKind::Single(PrimitiveType::Null) => IssueCategory::InvalidValue,
        TypeKind::Multiple(_) => IssueCategory::InvalidType,
    }
}

/// Splits a JSON pointer (`/analyses/0/title`) into unescaped segments.
fn pointer_segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::models::Verdict;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn business() -> Value {
        json!({
            "analyses": [{
                "id": "1",
                "title": "Revenue",
                "context": "Sales performance",
                "tables": ["orders"],
                "sub_analyses": [{
                    "id": "1.1",
                    "title": "Revenue by month",
                    "why": "Seasonality",
                    "answers": ["When do we sell most?"],
                    "tables_columns": ["orders.amount"]
                }]
            }]
        })
    }

    #[test]
    fn test_valid_payload_converts() {
        let validator = SchemaValidator::<BusinessAnalysis>::new().unwrap();
        let parsed = validator.validate(business()).unwrap();
        assert_eq!(parsed.analyses[0].sub_analyses[0].id, "1.1");
    }

    #[test]
    fn test_missing_field_reports_path() {
        let mut value = business();
        value["analyses"][0]["sub_analyses"][0]
            .as_object_mut()
            .unwrap()
            .remove("why");
        let validator = SchemaValidator::<BusinessAnalysis>::new().unwrap();
        let Err(ContractViolation::Schema(issues)) = validator.validate(value) else {
            panic!("expected schema issues");
        };
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, IssueCategory::Missing);
        assert_eq!(issues[0].location(), "analyses → 0 → sub_analyses → 0 → why");
    }

    #[test]
    fn test_type_mismatches_are_categorised() {
        let mut value = business();
        value["analyses"][0]["title"] = json!(42);
        value["analyses"][0]["tables"] = json!("orders");
        let validator = SchemaValidator::<BusinessAnalysis>::new().unwrap();
        let Err(ContractViolation::Schema(issues)) = validator.validate(value) else {
            panic!("expected schema issues");
        };
        let categories: Vec<_> = issues.iter().map(|i| i.category).collect();
        assert!(categories.contains(&IssueCategory::StringType));
        assert!(categories.contains(&IssueCategory::ListType));
    }

    #[test]
    fn test_parse_reports_malformed_json() {
        let validator = SchemaValidator::<BusinessAnalysis>::new().unwrap();
        assert!(matches!(
            validator.parse("{invalid"),
            Err(ContractViolation::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn test_verdict_enum_is_enforced() {
        let validator = SchemaValidator::<ConfidentialityTest>::new().unwrap();
        let payload = json!({
            "verdict": "MAYBE",
            "summary": "s",
            "data_exposure_count": 0,
            "total_questions": 0,
            "questions": []
        });
        assert!(validator.validate(payload.clone()).is_err());

        let mut ok = payload;
        ok["verdict"] = json!("PASS");
        assert_eq!(validator.validate(ok).unwrap().verdict, Verdict::Pass);
    }

    #[test]
    fn test_code_plan_follows_document_order() {
        let validator = SchemaValidator::<Visualizations>::new().unwrap();
        let mut value = business();
        let sub = value["analyses"][0]["sub_analyses"][0].as_object_mut().unwrap();
        sub.insert("type".into(), json!("trend"));
        sub.insert("code_lines".into(), json!(["result = orders"]));
        sub.insert("visualization_code".into(), json!(["result_plot = plt.gcf()"]));
        sub.insert("visualization_type".into(), json!("line"));
        sub.insert("justification".into(), json!("time series"));

        let plan = validator.validate(value).unwrap().code_plan();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].items[0].code_lines, vec!["result = orders".to_string()]);
        assert_eq!(
            plan[0].items[0].visualization.as_ref().map(|v| v.visualization_type.as_str()),
            Some("line")
        );
        assert!(BusinessAnalysis { analyses: vec![] }.code_plan().is_empty());
    }
}

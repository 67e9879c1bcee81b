use crate::file::csv::infer_value;
use async_trait::async_trait;
use engine_core::plugin::{
    config_str, config_str_or, Plugin, PluginConfig, PluginError, PluginMetadata, PluginType,
    ProcessorPlugin,
};
use model::{
    core::value::Value,
    progress::ProcessStats,
    records::{batch::DataBatch, record::Record, schema::Schema},
};
use serde_json::json;
use std::{cmp::Ordering, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterMode {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
}

impl CompareOp {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            "<" => Some(CompareOp::Lt),
            ">=" => Some(CompareOp::Ge),
            "<=" => Some(CompareOp::Le),
            "contains" => Some(CompareOp::Contains),
            _ => None,
        }
    }
}

/// Compiled form of the documented condition subset: a bare field name
/// (non-null test) or `<field> <op> <literal>`.
#[derive(Debug, Clone)]
enum Condition {
    NotNull {
        field: String,
    },
    Compare {
        field: String,
        op: CompareOp,
        literal: Value,
        raw_literal: String,
    },
}

impl Condition {
    fn parse(raw: &str) -> Result<Self, PluginError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PluginError::InvalidConfig("condition is required".into()));
        }

        let parts: Vec<&str> = raw.split_whitespace().collect();
        if parts.len() == 1 {
            return Ok(Condition::NotNull {
                field: parts[0].to_owned(),
            });
        }

        if parts.len() >= 3 {
            let op = CompareOp::parse(parts[1]).ok_or_else(|| {
                PluginError::InvalidConfig(format!("unknown operator '{}'", parts[1]))
            })?;
            let raw_literal = parts[2..].join(" ");
            return Ok(Condition::Compare {
                field: parts[0].to_owned(),
                op,
                literal: infer_value(&raw_literal),
                raw_literal,
            });
        }

        Err(PluginError::InvalidConfig(format!(
            "unsupported condition '{raw}'"
        )))
    }

    /// Evaluates the condition against one record. `None` marks an
    /// evaluation error (incomparable values).
    fn matches(&self, record: &Record, schema: &Schema) -> Option<bool> {
        match self {
            Condition::NotNull { field } => {
                let Some(index) = schema.column_index(field) else {
                    return Some(false);
                };
                Some(record.value_at(index).is_some_and(|v| !v.is_null()))
            }
            Condition::Compare {
                field,
                op,
                literal,
                raw_literal,
            } => {
                // An absent field never matches; only incomparable values
                // count as evaluation errors.
                let Some(index) = schema.column_index(field) else {
                    return Some(false);
                };
                let Some(value) = record.value_at(index) else {
                    return Some(false);
                };

                if value.is_null() {
                    return Some(*op == CompareOp::Eq && raw_literal == "null");
                }

                if *op == CompareOp::Contains {
                    let haystack = value.as_string()?;
                    return Some(haystack.contains(raw_literal.as_str()));
                }

                let ordering = value.compare(literal)?;
                Some(match op {
                    CompareOp::Eq => ordering == Ordering::Equal,
                    CompareOp::Ne => ordering != Ordering::Equal,
                    CompareOp::Gt => ordering == Ordering::Greater,
                    CompareOp::Lt => ordering == Ordering::Less,
                    CompareOp::Ge => ordering != Ordering::Less,
                    CompareOp::Le => ordering != Ordering::Greater,
                    CompareOp::Contains => unreachable!("handled above"),
                })
            }
        }
    }
}

/// Keeps or drops records by evaluating a condition per record.
pub struct FilterProcessor {
    condition: Option<Condition>,
    mode: FilterMode,
    stats: ProcessStats,
    started: Option<Instant>,
}

impl FilterProcessor {
    pub fn new() -> Self {
        Self {
            condition: None,
            mode: FilterMode::Include,
            stats: ProcessStats::default(),
            started: None,
        }
    }
}

impl Default for FilterProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for FilterProcessor {
    fn name(&self) -> &str {
        "filter"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Processor
    }

    fn initialize(&mut self, config: &PluginConfig) -> Result<(), PluginError> {
        let condition = config_str(config, "condition")?;
        self.condition = Some(Condition::parse(&condition)?);

        self.mode = match config_str_or(config, "mode", "include").as_str() {
            "include" => FilterMode::Include,
            "exclude" => FilterMode::Exclude,
            other => {
                return Err(PluginError::InvalidConfig(format!(
                    "invalid mode '{other}', must be 'include' or 'exclude'"
                )))
            }
        };

        self.stats = ProcessStats::default();
        self.started = Some(Instant::now());
        Ok(())
    }

    fn validate(&self) -> Result<(), PluginError> {
        if self.condition.is_none() {
            return Err(PluginError::InvalidConfig("condition is required".into()));
        }
        Ok(())
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "filter".into(),
            plugin_type: PluginType::Processor,
            version: "1.0.0".into(),
            description: "Filters records by a condition expression".into(),
            config_schema: json!({
                "type": "object",
                "properties": {
                    "condition": {
                        "type": "string",
                        "description": "Condition of the form '<field> <op> <literal>' or a bare field name"
                    },
                    "mode": {
                        "type": "string",
                        "enum": ["include", "exclude"],
                        "default": "include"
                    }
                },
                "required": ["condition"]
            }),
        }
    }
}

#[async_trait]
impl ProcessorPlugin for FilterProcessor {
    async fn process(&mut self, batch: &DataBatch) -> Result<DataBatch, PluginError> {
        let condition = self.condition.as_ref().ok_or_else(|| {
            PluginError::InvalidConfig("filter processor is not initialized".into())
        })?;

        let mut kept = Vec::new();
        for record in &batch.records {
            self.stats.records_in += 1;

            let matched = match condition.matches(record, &batch.schema) {
                Some(matched) => matched,
                None => {
                    self.stats.errors += 1;
                    continue;
                }
            };

            let keep = match self.mode {
                FilterMode::Include => matched,
                FilterMode::Exclude => !matched,
            };

            if keep {
                kept.push(record.clone());
                self.stats.records_out += 1;
            } else {
                self.stats.filtered += 1;
            }
        }

        let mut output = DataBatch::new(batch.schema.clone(), kept);
        output.metadata = batch.metadata.clone();
        output.checkpoint = batch.checkpoint.clone();
        Ok(output)
    }

    fn stats(&self) -> ProcessStats {
        let mut stats = self.stats;
        if let Some(started) = self.started {
            stats.duration = started.elapsed();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{core::data_type::DataType, records::schema::Column};
    use serde_json::Map;

    fn batch() -> DataBatch {
        let schema = Schema::new(vec![
            Column::new("name", DataType::String),
            Column::new("age", DataType::Int),
        ]);
        let records = vec![
            Record::new(vec![Value::String("Alice".into()), Value::Int(25)]),
            Record::new(vec![Value::String("Bob".into()), Value::Int(17)]),
            Record::new(vec![Value::String("Carol".into()), Value::Null]),
        ];
        DataBatch::new(schema, records)
    }

    fn filter_with(condition: &str, mode: &str) -> FilterProcessor {
        let mut config = Map::new();
        config.insert("condition".into(), json!(condition));
        config.insert("mode".into(), json!(mode));
        let mut processor = FilterProcessor::new();
        processor.initialize(&config).expect("initialize");
        processor
    }

    #[tokio::test]
    async fn include_mode_keeps_matching_records() {
        let mut processor = filter_with("age > 18", "include");
        let output = processor.process(&batch()).await.expect("process");
        assert_eq!(output.len(), 1);
        assert_eq!(output.records[0].values[0], Value::String("Alice".into()));
    }

    #[tokio::test]
    async fn exclude_mode_inverts_the_match() {
        let mut processor = filter_with("age > 18", "exclude");
        let output = processor.process(&batch()).await.expect("process");
        // Bob fails the predicate and Carol's null fails it too.
        assert_eq!(output.len(), 2);
    }

    #[tokio::test]
    async fn bare_field_name_tests_for_non_null() {
        let mut processor = filter_with("age", "include");
        let output = processor.process(&batch()).await.expect("process");
        assert_eq!(output.len(), 2);
        assert_eq!(processor.stats().filtered, 1);
    }

    #[tokio::test]
    async fn string_equality_and_contains() {
        let mut processor = filter_with("name = Alice", "include");
        let output = processor.process(&batch()).await.expect("process");
        assert_eq!(output.len(), 1);

        let mut processor = filter_with("name contains o", "include");
        let output = processor.process(&batch()).await.expect("process");
        assert_eq!(output.len(), 2); // Bob and Carol
    }

    #[test]
    fn unknown_operator_is_rejected_at_initialize() {
        let mut config = Map::new();
        config.insert("condition".into(), json!("age ~~ 18"));
        let mut processor = FilterProcessor::new();
        assert!(processor.initialize(&config).is_err());
    }

    #[test]
    fn missing_condition_fails_validation() {
        let processor = FilterProcessor::new();
        assert!(processor.validate().is_err());
    }
}

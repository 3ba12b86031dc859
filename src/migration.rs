//! BigQuery DDL for moving a table from one accepted version to the next.
//!
//! Only changes BigQuery can apply in place become statements: new NULLABLE
//! or REPEATED top-level columns, dropped NOT NULL constraints, supported
//! type coercions, and description updates. Everything else is listed as a
//! manual step and makes the plan non-additive.

use serde::{Deserialize, Serialize};

use crate::target::{BqType, Mode, TargetField, TargetSchema};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub table: String,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub manual_steps: Vec<String>,
}

impl MigrationPlan {
    /// `CREATE TABLE` for a first version.
    pub fn create(table: &str, schema: &TargetSchema) -> Self {
        let columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|column| format!("  {}", column_definition(column)))
            .collect();
        Self {
            table: table.to_string(),
            statements: vec![format!(
                "CREATE TABLE {} (\n{}\n);",
                quote(table),
                columns.join(",\n")
            )],
            manual_steps: Vec::new(),
        }
    }

    /// Statements turning a table shaped like `previous` into `next`.
    pub fn between(table: &str, previous: &TargetSchema, next: &TargetSchema) -> Self {
        let mut plan = Self {
            table: table.to_string(),
            ..Self::default()
        };
        for column in next.fields() {
            match find_column(previous, &column.name) {
                Some(old) => plan.alter_column(old, column),
                None => plan.add_column(column),
            }
        }
        for old in previous.fields() {
            if find_column(next, &old.name).is_none() {
                plan.manual_steps.push(format!(
                    "column `{}` is no longer produced; dropping it discards its data",
                    old.name
                ));
            }
        }
        plan
    }

    pub fn is_additive(&self) -> bool {
        self.manual_steps.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.manual_steps.is_empty()
    }

    fn alter_table(&self, action: String) -> String {
        format!("ALTER TABLE {} {action};", quote(&self.table))
    }

    fn add_column(&mut self, column: &TargetField) {
        if column.mode == Mode::Required {
            self.manual_steps.push(format!(
                "column `{}` is REQUIRED; BigQuery only adds NULLABLE or REPEATED columns to existing tables",
                column.name
            ));
            return;
        }
        let statement = self.alter_table(format!("ADD COLUMN {}", column_definition(column)));
        self.statements.push(statement);
    }

    fn alter_column(&mut self, old: &TargetField, new: &TargetField) {
        let name = quote(&new.name);
        if old.mode != new.mode {
            match (old.mode, new.mode) {
                (Mode::Required, Mode::Nullable) => {
                    let statement = self.alter_table(format!("ALTER COLUMN {name} DROP NOT NULL"));
                    self.statements.push(statement);
                }
                (from, to) => self.manual_steps.push(format!(
                    "column `{}` changes mode from {from} to {to}",
                    new.name
                )),
            }
        }

        if new.bq_type == BqType::Struct || old.bq_type == BqType::Struct {
            if !same_shape(old, new) {
                self.manual_steps.push(format!(
                    "members of STRUCT column `{}` changed; apply them with a schema update",
                    new.name
                ));
            }
        } else if !same_type(old, new) {
            if coercible(old, new) {
                let statement = self.alter_table(format!(
                    "ALTER COLUMN {name} SET DATA TYPE {}",
                    scalar_type(new)
                ));
                self.statements.push(statement);
            } else {
                self.manual_steps.push(format!(
                    "column `{}` changes type from {} to {}",
                    new.name,
                    scalar_type(old),
                    scalar_type(new)
                ));
            }
        }

        if old.description != new.description {
            if let Some(description) = &new.description {
                let statement = self.alter_table(format!(
                    "ALTER COLUMN {name} SET OPTIONS (description = {})",
                    string_literal(description)
                ));
                self.statements.push(statement);
            }
        }
    }
}

/// Target names are case-insensitive.
fn find_column<'a>(schema: &'a TargetSchema, name: &str) -> Option<&'a TargetField> {
    schema
        .fields()
        .iter()
        .find(|column| column.name.eq_ignore_ascii_case(name))
}

fn same_type(old: &TargetField, new: &TargetField) -> bool {
    old.bq_type == new.bq_type && old.precision == new.precision && old.scale == new.scale
}

fn same_shape(old: &TargetField, new: &TargetField) -> bool {
    same_type(old, new)
        && old.mode == new.mode
        && old.fields.len() == new.fields.len()
        && old
            .fields
            .iter()
            .zip(&new.fields)
            .all(|(left, right)| left.name == right.name && same_shape(left, right))
}

/// Coercions `ALTER COLUMN ... SET DATA TYPE` accepts.
fn coercible(old: &TargetField, new: &TargetField) -> bool {
    match (old.bq_type, new.bq_type) {
        (BqType::Int64, BqType::Numeric | BqType::Bignumeric | BqType::Float64)
        | (BqType::Numeric, BqType::Bignumeric | BqType::Float64)
        | (BqType::Bignumeric, BqType::Float64) => true,
        (from, to) if from == to && from.is_decimal() => match (decimal_bounds(old), decimal_bounds(new)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some((old_digits, old_scale)), Some((new_digits, new_scale))) => {
                new_digits >= old_digits && new_scale >= old_scale
            }
        },
        _ => false,
    }
}

/// Integer digits and scale of a parameterised decimal column.
fn decimal_bounds(column: &TargetField) -> Option<(u8, u8)> {
    let precision = column.precision?;
    let scale = column.scale.unwrap_or(0);
    Some((precision.saturating_sub(scale), scale))
}

fn quote(identifier: &str) -> String {
    format!("`{identifier}`")
}

fn string_literal(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn scalar_type(column: &TargetField) -> String {
    match (column.precision, column.scale) {
        (Some(precision), Some(scale)) => format!("{}({precision}, {scale})", column.bq_type),
        (Some(precision), None) => format!("{}({precision})", column.bq_type),
        _ => column.bq_type.to_string(),
    }
}

fn data_type(column: &TargetField) -> String {
    let element = if column.bq_type == BqType::Struct {
        let members: Vec<String> = column.fields.iter().map(member_definition).collect();
        format!("STRUCT<{}>", members.join(", "))
    } else {
        scalar_type(column)
    };
    if column.mode == Mode::Repeated {
        format!("ARRAY<{element}>")
    } else {
        element
    }
}

fn member_definition(member: &TargetField) -> String {
    let mut definition = format!("{} {}", quote(&member.name), data_type(member));
    if member.mode == Mode::Required {
        definition.push_str(" NOT NULL");
    }
    definition
}

fn column_definition(column: &TargetField) -> String {
    let mut definition = member_definition(column);
    if let Some(description) = &column.description {
        definition.push_str(&format!(
            " OPTIONS (description = {})",
            string_literal(description)
        ));
    }
    definition
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, bq_type: BqType, mode: Mode) -> TargetField {
        TargetField {
            name: name.to_string(),
            bq_type,
            mode,
            fields: Vec::new(),
            precision: None,
            scale: None,
            description: None,
            source_path: name.to_string(),
        }
    }

    fn numeric(name: &str, precision: u8, scale: u8) -> TargetField {
        let mut column = column(name, BqType::Numeric, Mode::Nullable);
        column.precision = Some(precision);
        column.scale = Some(scale);
        column
    }

    #[test]
    fn first_version_gets_a_create_statement() {
        let mut customer = column("customer", BqType::Struct, Mode::Nullable);
        customer.fields.push(column("id", BqType::Int64, Mode::Required));
        let mut tags = column("tags", BqType::String, Mode::Repeated);
        tags.description = Some("Free \"form\" labels".to_string());
        let schema = TargetSchema::new(
            "orders",
            vec![column("id", BqType::Int64, Mode::Required), customer, tags],
        );
        let plan = MigrationPlan::create("shop.orders", &schema);
        assert_eq!(
            plan.statements,
            vec![
                "CREATE TABLE `shop.orders` (\n  `id` INT64 NOT NULL,\n  `customer` STRUCT<`id` INT64 NOT NULL>,\n  `tags` ARRAY<STRING> OPTIONS (description = \"Free \\\"form\\\" labels\")\n);"
            ]
        );
        assert!(plan.is_additive());
    }

    #[test]
    fn additive_changes_become_alter_statements() {
        let previous = TargetSchema::new(
            "orders",
            vec![
                column("id", BqType::Int64, Mode::Required),
                column("quantity", BqType::Int64, Mode::Required),
                numeric("total", 10, 2),
            ],
        );
        let next = TargetSchema::new(
            "orders",
            vec![
                column("id", BqType::Int64, Mode::Required),
                column("quantity", BqType::Int64, Mode::Nullable),
                numeric("total", 12, 4),
                column("coupon", BqType::String, Mode::Nullable),
            ],
        );
        let plan = MigrationPlan::between("orders", &previous, &next);
        assert_eq!(
            plan.statements,
            vec![
                "ALTER TABLE `orders` ALTER COLUMN `quantity` DROP NOT NULL;",
                "ALTER TABLE `orders` ALTER COLUMN `total` SET DATA TYPE NUMERIC(12, 4);",
                "ALTER TABLE `orders` ADD COLUMN `coupon` STRING;",
            ]
        );
        assert!(plan.is_additive());
    }

    #[test]
    fn integer_to_numeric_is_coerced_in_place() {
        let previous = TargetSchema::new("orders", vec![column("qty", BqType::Int64, Mode::Nullable)]);
        let next = TargetSchema::new("orders", vec![numeric("qty", 21, 2)]);
        let plan = MigrationPlan::between("orders", &previous, &next);
        assert_eq!(
            plan.statements,
            vec!["ALTER TABLE `orders` ALTER COLUMN `qty` SET DATA TYPE NUMERIC(21, 2);"]
        );
    }

    #[test]
    fn unsupported_changes_are_left_as_manual_steps() {
        let mut customer = column("customer", BqType::Struct, Mode::Nullable);
        customer.fields.push(column("id", BqType::Int64, Mode::Nullable));
        let mut wider_customer = customer.clone();
        wider_customer
            .fields
            .push(column("tier", BqType::String, Mode::Nullable));
        let previous = TargetSchema::new(
            "orders",
            vec![
                column("id", BqType::Int64, Mode::Required),
                column("note", BqType::String, Mode::Nullable),
                customer,
                numeric("total", 12, 4),
            ],
        );
        let next = TargetSchema::new(
            "orders",
            vec![
                column("id", BqType::String, Mode::Required),
                wider_customer,
                numeric("total", 10, 2),
                column("region", BqType::String, Mode::Required),
            ],
        );
        let plan = MigrationPlan::between("orders", &previous, &next);
        assert!(plan.statements.is_empty(), "{:?}", plan.statements);
        assert_eq!(plan.manual_steps.len(), 5);
        assert!(plan.manual_steps[0].contains("INT64 to STRING"));
        assert!(plan.manual_steps[1].contains("STRUCT column `customer`"));
        assert!(plan.manual_steps[2].contains("NUMERIC(12, 4) to NUMERIC(10, 2)"));
        assert!(plan.manual_steps[3].contains("`region` is REQUIRED"));
        assert!(plan.manual_steps[4].contains("`note` is no longer produced"));
        assert!(!plan.is_additive());
    }
}

use std::collections::HashSet;
use std::io::Read;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::Database;
use crate::models::{DEFAULT_CATEGORY, NewIngredient, normalize_name};

/// A single ingredient row from a catalog CSV.
#[derive(Debug, Clone)]
pub struct CatalogRow {
    pub name: String,
    pub category: String,
    pub default_unit: String,
}

/// What a catalog import would do / did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CatalogImportSummary {
    pub rows_parsed: usize,
    pub ingredients_created: usize,
    pub ingredients_reused: usize,
}

/// Parse an ingredient catalog from any reader.
///
/// Expected header: `name,category,default_unit`. Only `name` is required;
/// a missing category falls back to `other` and a missing unit to empty.
pub fn parse_catalog_csv<R: Read>(reader: R) -> Result<Vec<CatalogRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col = |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let Some(idx_name) = col("name") else {
        bail!("Missing required column: name");
    };
    let idx_category = col("category");
    let idx_unit = col("default_unit").or_else(|| col("unit"));

    let mut rows = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;
        let field = |idx: Option<usize>| -> String {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };

        let name = field(Some(idx_name));
        if name.is_empty() {
            continue;
        }
        let category = field(idx_category);
        rows.push(CatalogRow {
            name,
            category: if category.is_empty() {
                DEFAULT_CATEGORY.to_string()
            } else {
                category.to_lowercase()
            },
            default_unit: field(idx_unit),
        });
    }

    Ok(rows)
}

/// Add catalog rows as ingredients. Names already in the catalog (after
/// normalizing) are reused. When `dry_run` is true nothing is written.
pub fn import_catalog(db: &Database, rows: &[CatalogRow], dry_run: bool) -> Result<CatalogImportSummary> {
    let mut summary = CatalogImportSummary {
        rows_parsed: rows.len(),
        ..CatalogImportSummary::default()
    };
    let mut seen: HashSet<String> = HashSet::new();

    for row in rows {
        let key = normalize_name(&row.name);
        if !seen.insert(key) || db.find_ingredient_by_name(&row.name)?.is_some() {
            debug!(name = %row.name, "ingredient already in catalog");
            summary.ingredients_reused += 1;
            continue;
        }
        if !dry_run {
            db.insert_ingredient(&NewIngredient {
                name: row.name.clone(),
                category: row.category.clone(),
                default_unit: row.default_unit.clone(),
            })?;
        }
        summary.ingredients_created += 1;
    }

    info!(
        created = summary.ingredients_created,
        reused = summary.ingredients_reused,
        dry_run,
        "catalog import finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSV: &str = "\
name,category,default_unit
Basmati Rice,Pantry,g
Red Onion,produce,pcs
Whole Milk,dairy,ml
Garlic,,
";

    #[test]
    fn test_parse_catalog_csv_basic() {
        let rows = parse_catalog_csv(SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].name, "Basmati Rice");
        assert_eq!(rows[0].category, "pantry");
        assert_eq!(rows[0].default_unit, "g");
        assert_eq!(rows[3].category, DEFAULT_CATEGORY);
        assert_eq!(rows[3].default_unit, "");
    }

    #[test]
    fn test_parse_catalog_csv_missing_name_column() {
        let result = parse_catalog_csv("category,unit\npantry,g\n".as_bytes());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("name"));
    }

    #[test]
    fn test_parse_catalog_csv_name_only() {
        let rows = parse_catalog_csv("Name\nEggs\n\nFlour\n".as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "Flour");
    }

    #[test]
    fn test_import_catalog_dry_run() {
        let db = Database::open_in_memory().unwrap();
        let rows = parse_catalog_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let summary = import_catalog(&db, &rows, true).unwrap();
        assert_eq!(summary.rows_parsed, 4);
        assert_eq!(summary.ingredients_created, 4);
        assert!(db.list_ingredients(None).unwrap().is_empty());
    }

    #[test]
    fn test_import_catalog_reuses_existing() {
        let db = Database::open_in_memory().unwrap();
        let rows = parse_catalog_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let first = import_catalog(&db, &rows, false).unwrap();
        assert_eq!(first.ingredients_created, 4);

        let again = parse_catalog_csv("name\nbasmati rice\nGARLIC\nButter\n".as_bytes()).unwrap();
        let second = import_catalog(&db, &again, false).unwrap();
        assert_eq!(second.ingredients_created, 1);
        assert_eq!(second.ingredients_reused, 2);
        assert_eq!(db.list_ingredients(None).unwrap().len(), 5);
    }

    #[test]
    fn test_import_catalog_dedupes_within_file() {
        let db = Database::open_in_memory().unwrap();
        let rows = parse_catalog_csv("name\nEggs\neggs \n".as_bytes()).unwrap();
        let summary = import_catalog(&db, &rows, true).unwrap();
        assert_eq!(summary.ingredients_created, 1);
        assert_eq!(summary.ingredients_reused, 1);
    }
}

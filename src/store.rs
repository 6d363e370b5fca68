use crate::calc::{
    self, AssignmentInput, AssignmentTotals, CategoryInput, CategoryMode, FillStrategy,
    GradeSettings,
};
use crate::db;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

pub const SETTINGS_KEY: &str = "settings.grades";
pub const ANALYZER_STATE_KEY: &str = "analyzer.state";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    pub id: String,
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub categories: Vec<CategoryRecord>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl ClassRecord {
    pub fn weight_total(&self) -> f64 {
        self.categories.iter().map(|c| c.weight).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub name: String,
    pub earned: Option<f64>,
    pub total: Option<f64>,
    #[serde(default)]
    pub sort_order: i64,
}

impl AssignmentRecord {
    fn as_input(&self) -> AssignmentInput {
        AssignmentInput {
            earned: self.earned,
            total: self.total,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    #[serde(default = "default_mode")]
    pub mode: CategoryMode,
    pub grade: Option<f64>,
    #[serde(default)]
    pub assignments: Vec<AssignmentRecord>,
}

fn default_mode() -> CategoryMode {
    CategoryMode::Known
}

impl Default for EntryRecord {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            grade: None,
            assignments: Vec::new(),
        }
    }
}

impl EntryRecord {
    pub fn derived(&self) -> Option<AssignmentTotals> {
        let inputs: Vec<AssignmentInput> = self.assignments.iter().map(|a| a.as_input()).collect();
        calc::derive_category_grade(&inputs)
    }

    pub fn effective_grade(&self) -> Option<f64> {
        self.derived()
            .map(|t| t.percent)
            .or_else(|| self.grade.filter(|g| g.is_finite()))
    }
}

/// A category joined with its analyzer entry, as shown to the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerRow {
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub mode: CategoryMode,
    pub grade: Option<f64>,
    pub effective_grade: Option<f64>,
    pub derived: Option<AssignmentTotals>,
    pub assignments: Vec<AssignmentRecord>,
}

impl AnalyzerRow {
    pub fn as_input(&self) -> CategoryInput {
        CategoryInput {
            weight: self.weight,
            mode: self.mode,
            grade: self.effective_grade,
        }
    }
}

pub fn analyzer_rows(class: &ClassRecord, entries: &HashMap<String, EntryRecord>) -> Vec<AnalyzerRow> {
    class
        .categories
        .iter()
        .map(|c| {
            let entry = entries.get(&c.id).cloned().unwrap_or_default();
            AnalyzerRow {
                category_id: c.id.clone(),
                name: c.name.clone(),
                weight: c.weight,
                mode: entry.mode,
                grade: entry.grade,
                effective_grade: entry.effective_grade(),
                derived: entry.derived(),
                assignments: entry.assignments,
            }
        })
        .collect()
}

fn load_categories(conn: &Connection, class_id: &str) -> anyhow::Result<Vec<CategoryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, weight, sort_order
         FROM categories
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(CategoryRecord {
                id: r.get(0)?,
                name: r.get(1)?,
                weight: r.get(2)?,
                sort_order: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_classes(conn: &Connection) -> anyhow::Result<Vec<ClassRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at, updated_at
         FROM classes
         ORDER BY created_at, rowid",
    )?;
    let heads = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(heads.len());
    for (id, name, created_at, updated_at) in heads {
        let categories = load_categories(conn, &id)?;
        out.push(ClassRecord {
            id,
            name,
            categories,
            created_at,
            updated_at,
        });
    }
    Ok(out)
}

pub fn load_class(conn: &Connection, class_id: &str) -> anyhow::Result<Option<ClassRecord>> {
    let head: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT name, created_at, updated_at FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((name, created_at, updated_at)) = head else {
        return Ok(None);
    };
    Ok(Some(ClassRecord {
        id: class_id.to_string(),
        name,
        categories: load_categories(conn, class_id)?,
        created_at,
        updated_at,
    }))
}

pub fn load_entries(
    conn: &Connection,
    class_id: &str,
) -> anyhow::Result<HashMap<String, EntryRecord>> {
    let mut entries: HashMap<String, EntryRecord> = HashMap::new();

    let mut stmt = conn.prepare(
        "SELECT category_id, mode, grade FROM grade_entries WHERE class_id = ?",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<f64>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (category_id, mode_raw, grade) in rows {
        let mode = CategoryMode::parse(&mode_raw).unwrap_or_else(|| {
            tracing::warn!(%category_id, mode = %mode_raw, "unknown stored mode; using known");
            CategoryMode::Known
        });
        entries.insert(
            category_id,
            EntryRecord {
                mode,
                grade,
                assignments: Vec::new(),
            },
        );
    }

    let mut stmt = conn.prepare(
        "SELECT id, category_id, name, earned, total, sort_order
         FROM assignments
         WHERE class_id = ?
         ORDER BY sort_order",
    )?;
    let assignments = stmt
        .query_map([class_id], |r| {
            Ok(AssignmentRecord {
                id: r.get(0)?,
                category_id: r.get(1)?,
                name: r.get(2)?,
                earned: r.get(3)?,
                total: r.get(4)?,
                sort_order: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for a in assignments {
        entries
            .entry(a.category_id.clone())
            .or_default()
            .assignments
            .push(a);
    }

    Ok(entries)
}

/// Inserts a blank entry for every category that has none yet.
pub fn seed_entries(conn: &Connection, class: &ClassRecord) -> anyhow::Result<usize> {
    let mut seeded = 0;
    for c in &class.categories {
        seeded += conn.execute(
            "INSERT OR IGNORE INTO grade_entries(class_id, category_id, mode, grade)
             VALUES(?, ?, 'known', NULL)",
            (&class.id, &c.id),
        )?;
    }
    Ok(seeded)
}

pub fn upsert_entry(
    conn: &Connection,
    class_id: &str,
    category_id: &str,
    mode: CategoryMode,
    grade: Option<f64>,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO grade_entries(class_id, category_id, mode, grade, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_id, category_id) DO UPDATE SET
           mode = excluded.mode,
           grade = excluded.grade,
           updated_at = excluded.updated_at",
        (
            class_id,
            category_id,
            mode.as_str(),
            grade,
            db::now_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn load_assignment(conn: &Connection, id: &str) -> anyhow::Result<Option<(String, AssignmentRecord)>> {
    let row = conn
        .query_row(
            "SELECT class_id, category_id, name, earned, total, sort_order
             FROM assignments
             WHERE id = ?",
            [id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    AssignmentRecord {
                        id: id.to_string(),
                        category_id: r.get(1)?,
                        name: r.get(2)?,
                        earned: r.get(3)?,
                        total: r.get(4)?,
                        sort_order: r.get(5)?,
                    },
                ))
            },
        )
        .optional()?;
    Ok(row)
}

/// Rewrites the stored manual grade after the assignment list changed:
/// the derived grade when one exists, otherwise `fallback`.
pub fn sync_entry_grade(
    conn: &Connection,
    class_id: &str,
    category_id: &str,
    fallback: Option<f64>,
) -> anyhow::Result<EntryRecord> {
    let mut entries = load_entries(conn, class_id)?;
    let entry = entries.remove(category_id).unwrap_or_default();
    let grade = entry
        .derived()
        .map(|t| calc::round_to(t.percent, 4))
        .or(fallback);
    upsert_entry(conn, class_id, category_id, entry.mode, grade)?;
    Ok(EntryRecord { grade, ..entry })
}

pub fn settings_json(settings: &GradeSettings) -> Value {
    serde_json::to_value(settings).unwrap_or_else(|_| json!({}))
}

fn parse_threshold(v: &Value, key: &str) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !n.is_finite() || !(0.0..=100.0).contains(&n) {
        return Err(format!("{} must be in 0..=100", key));
    }
    Ok(n)
}

/// Applies a settings patch. Threshold ordering is deliberately not checked.
pub fn merge_settings_patch(
    current: &mut GradeSettings,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    for (k, v) in patch {
        match k.as_str() {
            "aThreshold" => current.a_threshold = parse_threshold(v, k)?,
            "aMinusThreshold" => current.a_minus_threshold = parse_threshold(v, k)?,
            "worstCaseFill" => current.worst_case_fill = parse_threshold(v, k)?,
            "fillStrategy" => {
                let s = v
                    .as_str()
                    .ok_or_else(|| format!("{} must be string", k))?;
                current.fill_strategy = FillStrategy::parse(s)
                    .ok_or_else(|| format!("unknown fillStrategy: {}", s))?;
            }
            _ => return Err(format!("unknown settings field: {}", k)),
        }
    }
    Ok(())
}

/// Applies each field on its own so one bad historical value does not reset
/// the rest.
fn merge_settings_lenient(current: &mut GradeSettings, obj: &Map<String, Value>) {
    for (k, v) in obj {
        let mut single = Map::new();
        single.insert(k.clone(), v.clone());
        if let Err(msg) = merge_settings_patch(current, &single) {
            tracing::warn!(field = %k, %msg, "ignoring stored setting");
        }
    }
}

pub fn load_settings(conn: &Connection) -> anyhow::Result<GradeSettings> {
    let mut current = GradeSettings::default();
    if let Some(saved) = db::settings_get_json(conn, SETTINGS_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            merge_settings_lenient(&mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn save_settings(conn: &Connection, settings: &GradeSettings) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &settings_json(settings))
}

pub fn selected_class_id(conn: &Connection) -> anyhow::Result<Option<String>> {
    Ok(db::settings_get_json(conn, ANALYZER_STATE_KEY)?
        .and_then(|v| {
            v.get("selectedClassId")
                .and_then(|s| s.as_str())
                .map(str::to_string)
        })
        .filter(|s| !s.is_empty()))
}

pub fn set_selected_class_id(conn: &Connection, class_id: Option<&str>) -> anyhow::Result<()> {
    db::settings_set_json(
        conn,
        ANALYZER_STATE_KEY,
        &json!({ "selectedClassId": class_id.unwrap_or("") }),
    )
}

/// The whole workspace as one JSON blob: classes, settings and analyzer
/// entries keyed by class id then category id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDocument {
    #[serde(default)]
    pub classes: Vec<ClassRecord>,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub analyzer_state: AnalyzerStateDocument,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerStateDocument {
    #[serde(default)]
    pub selected_class_id: String,
    #[serde(default)]
    pub entries: HashMap<String, HashMap<String, EntryRecord>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub classes: usize,
    pub categories: usize,
    pub entries: usize,
    pub assignments: usize,
}

pub fn export_document(conn: &Connection) -> anyhow::Result<WorkspaceDocument> {
    let classes = list_classes(conn)?;
    let mut entries = HashMap::new();
    for c in &classes {
        entries.insert(c.id.clone(), load_entries(conn, &c.id)?);
    }
    Ok(WorkspaceDocument {
        classes,
        settings: Some(settings_json(&load_settings(conn)?)),
        analyzer_state: AnalyzerStateDocument {
            selected_class_id: selected_class_id(conn)?.unwrap_or_default(),
            entries,
        },
    })
}

/// Replaces the workspace contents with `doc`. Entries for unknown classes or
/// categories are dropped; settings fields that do not parse keep defaults.
pub fn import_document(conn: &Connection, doc: &WorkspaceDocument) -> anyhow::Result<ImportCounts> {
    let mut counts = ImportCounts::default();
    let tx = conn.unchecked_transaction()?;

    tx.execute("DELETE FROM assignments", [])?;
    tx.execute("DELETE FROM grade_entries", [])?;
    tx.execute("DELETE FROM categories", [])?;
    tx.execute("DELETE FROM classes", [])?;

    let now = db::now_rfc3339();
    for class in &doc.classes {
        if class.id.trim().is_empty() {
            anyhow::bail!("class without id in document");
        }
        tx.execute(
            "INSERT INTO classes(id, name, created_at, updated_at) VALUES(?, ?, ?, ?)",
            (
                &class.id,
                &class.name,
                class.created_at.clone().unwrap_or_else(|| now.clone()),
                class.updated_at.clone().unwrap_or_else(|| now.clone()),
            ),
        )?;
        counts.classes += 1;

        let class_entries = doc.analyzer_state.entries.get(&class.id);
        for (i, cat) in class.categories.iter().enumerate() {
            tx.execute(
                "INSERT INTO categories(id, class_id, name, weight, sort_order) VALUES(?, ?, ?, ?, ?)",
                (&cat.id, &class.id, &cat.name, cat.weight, i as i64),
            )?;
            counts.categories += 1;

            let Some(entry) = class_entries.and_then(|m| m.get(&cat.id)) else {
                continue;
            };
            tx.execute(
                "INSERT INTO grade_entries(class_id, category_id, mode, grade, updated_at)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    &class.id,
                    &cat.id,
                    entry.mode.as_str(),
                    entry.grade.filter(|g| g.is_finite()),
                    &now,
                ),
            )?;
            counts.entries += 1;

            for (j, a) in entry.assignments.iter().enumerate() {
                let id = if a.id.trim().is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    a.id.clone()
                };
                tx.execute(
                    "INSERT INTO assignments(id, class_id, category_id, name, earned, total, sort_order)
                     VALUES(?, ?, ?, ?, ?, ?, ?)",
                    (
                        id,
                        &class.id,
                        &cat.id,
                        &a.name,
                        a.earned.filter(|v| v.is_finite()),
                        a.total.filter(|v| v.is_finite()),
                        j as i64,
                    ),
                )?;
                counts.assignments += 1;
            }
        }
    }

    let mut settings = GradeSettings::default();
    if let Some(obj) = doc.settings.as_ref().and_then(|v| v.as_object()) {
        merge_settings_lenient(&mut settings, obj);
    }
    save_settings(&tx, &settings)?;

    let selected = doc.analyzer_state.selected_class_id.as_str();
    let selected_known = doc.classes.iter().any(|c| c.id == selected);
    set_selected_class_id(&tx, selected_known.then_some(selected))?;

    tx.commit()?;
    Ok(counts)
}

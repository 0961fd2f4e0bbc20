// store.rs — GoalStore: persistence for goal records.
//
// Each goal is stored as a JSON file: `<store_dir>/<goal_id>.json`.
// One bad record must never fail the whole load, so `load_all` parses each
// file independently:
//   1. parse as-is;
//   2. on failure, strip trailing separators (`,}` / `,]`) outside string
//      literals and parse again, rewriting the file in canonical form if
//      that works;
//   3. reject records whose id does not match the file name or whose cursor
//      is past the end of the plan;
//   4. move anything rejected to `<store_dir>/quarantine/` and report it. If
//      the move itself fails the record stays where it is and is still
//      reported; loading continues.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::GoalError;
use crate::goal::Goal;

const QUARANTINE_DIR: &str = "quarantine";

/// A record that could not be loaded and was moved aside.
#[derive(Debug, Clone)]
pub struct QuarantinedRecord {
    /// Where the record was moved to, or its original path if the move failed.
    pub path: PathBuf,
    /// Original file name inside the store.
    pub file_name: String,
    /// Why it could not be loaded.
    pub error: String,
}

/// Result of loading every record in a store.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Records that loaded, including repaired ones. Newest first.
    pub goals: Vec<Goal>,
    /// Ids of records that needed the repair pass.
    pub repaired: Vec<Uuid>,
    /// Records that could not be recovered.
    pub quarantined: Vec<QuarantinedRecord>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.repaired.is_empty() && self.quarantined.is_empty()
    }
}

/// Persistent store for goal records.
pub struct GoalStore {
    store_dir: PathBuf,
}

impl GoalStore {
    /// Create a new store backed by the given directory.
    /// Creates the directory if it doesn't exist.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self, GoalError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        fs::create_dir_all(&store_dir).map_err(|source| GoalError::IoError {
            path: store_dir.display().to_string(),
            source,
        })?;
        Ok(Self { store_dir })
    }

    pub fn dir(&self) -> &Path {
        &self.store_dir
    }

    /// Save a goal to disk (creates or overwrites).
    pub fn save(&self, goal: &Goal) -> Result<(), GoalError> {
        let path = self.goal_file(goal.id);
        let json = serde_json::to_string_pretty(goal)?;
        fs::write(&path, json).map_err(|source| GoalError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Get a specific goal by ID.
    pub fn get(&self, goal_id: Uuid) -> Result<Option<Goal>, GoalError> {
        let path = self.goal_file(goal_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = read(&path)?;
        let goal: Goal = serde_json::from_str(&json)?;
        Ok(Some(goal))
    }

    /// List all readable goals, newest first. Read-only: unreadable records
    /// are skipped, not repaired or quarantined.
    pub fn list(&self) -> Result<Vec<Goal>, GoalError> {
        let mut goals = Vec::new();
        for path in self.record_paths()? {
            let json = read(&path)?;
            match serde_json::from_str::<Goal>(&json) {
                Ok(goal) => goals.push(goal),
                Err(e) => tracing::debug!("skipping unreadable record {}: {}", path.display(), e),
            }
        }
        goals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(goals)
    }

    /// Load every record, repairing what can be repaired and quarantining
    /// the rest. Only a failure to read the store directory itself is
    /// returned as an error; a record that cannot be moved aside is reported
    /// with its original path and skipped.
    pub fn load_all(&self) -> Result<LoadReport, GoalError> {
        let mut report = LoadReport::default();

        for path in self.record_paths()? {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let outcome = match read(&path) {
                Ok(json) => parse_record(&json),
                Err(e) => Err(e.to_string()),
            };

            let outcome = outcome.and_then(|(goal, repaired)| {
                if expected_file_name(goal.id) != file_name {
                    return Err(format!("record id {} does not match file name", goal.id));
                }
                goal.validate().map_err(|e| e.to_string())?;
                Ok((goal, repaired))
            });

            match outcome {
                Ok((goal, repaired)) => {
                    if repaired {
                        tracing::warn!("repaired malformed goal record {}", file_name);
                        if let Err(e) = self.save(&goal) {
                            tracing::warn!("could not rewrite repaired record {}: {}", file_name, e);
                        }
                        report.repaired.push(goal.id);
                    }
                    report.goals.push(goal);
                }
                Err(error) => {
                    tracing::warn!("quarantining goal record {}: {}", file_name, error);
                    let record = match self.quarantine(&path, &file_name) {
                        Ok(moved) => QuarantinedRecord {
                            path: moved,
                            file_name,
                            error,
                        },
                        Err(e) => {
                            tracing::warn!("could not move {} to quarantine: {}", file_name, e);
                            QuarantinedRecord {
                                error: format!("{}; left in place: {}", error, e),
                                path,
                                file_name,
                            }
                        }
                    };
                    report.quarantined.push(record);
                }
            }
        }

        report.goals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(report)
    }

    /// Delete a goal from the store.
    pub fn delete(&self, goal_id: Uuid) -> Result<bool, GoalError> {
        let path = self.goal_file(goal_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| GoalError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Ok(true)
    }

    /// Path to the JSON file for a given goal.
    fn goal_file(&self, goal_id: Uuid) -> PathBuf {
        self.store_dir.join(expected_file_name(goal_id))
    }

    /// All `*.json` files directly inside the store directory.
    fn record_paths(&self) -> Result<Vec<PathBuf>, GoalError> {
        let entries = fs::read_dir(&self.store_dir).map_err(|source| GoalError::IoError {
            path: self.store_dir.display().to_string(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| GoalError::IoError {
                path: self.store_dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn quarantine(&self, path: &Path, file_name: &str) -> Result<PathBuf, GoalError> {
        let dir = self.store_dir.join(QUARANTINE_DIR);
        fs::create_dir_all(&dir).map_err(|source| GoalError::IoError {
            path: dir.display().to_string(),
            source,
        })?;
        let target = dir.join(file_name);
        fs::rename(path, &target).map_err(|source| GoalError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Ok(target)
    }
}

fn expected_file_name(goal_id: Uuid) -> String {
    format!("{}.json", goal_id)
}

fn read(path: &Path) -> Result<String, GoalError> {
    fs::read_to_string(path).map_err(|source| GoalError::IoError {
        path: path.display().to_string(),
        source,
    })
}

/// Parse a record, falling back to the trailing-separator repair.
/// Returns the goal and whether the repair was needed.
fn parse_record(json: &str) -> Result<(Goal, bool), String> {
    match serde_json::from_str::<Goal>(json) {
        Ok(goal) => Ok((goal, false)),
        Err(original) => {
            let repaired = strip_trailing_separators(json);
            if repaired == json {
                return Err(original.to_string());
            }
            serde_json::from_str::<Goal>(&repaired)
                .map(|goal| (goal, true))
                .map_err(|_| original.to_string())
        }
    }
}

/// Remove commas that directly precede a closing brace or bracket.
/// String literals are matched as a whole and left untouched.
fn strip_trailing_separators(json: &str) -> String {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    let re = TRAILING.get_or_init(|| {
        Regex::new(r#""(?:[^"\\]|\\.)*"|,(\s*[}\]])"#).expect("static regex")
    });
    re.replace_all(json, |caps: &regex::Captures| match caps.get(1) {
        Some(close) => close.as_str().to_string(),
        None => caps[0].to_string(),
    })
    .into_owned()
}

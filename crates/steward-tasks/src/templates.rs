//! Template library — decompositions that scored well are kept and reused
//! for sufficiently similar goals, skipping a planner call.

use std::path::PathBuf;
use std::sync::Mutex;

use steward_core::statefile;
use tracing::{info, warn};

use crate::types::{Subtask, SubtaskStatus, TaskTemplate};

const MAX_TEMPLATES: usize = 50;
/// Minimum keyword overlap for a template to be reused.
const MATCH_THRESHOLD: f64 = 0.6;

pub struct TemplateLibrary {
    path: PathBuf,
    templates: Mutex<Vec<TaskTemplate>>,
}

impl TemplateLibrary {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let templates = statefile::load_or_default(&path);
        Self {
            path,
            templates: Mutex::new(templates),
        }
    }

    fn save(&self, templates: &Vec<TaskTemplate>) {
        if let Err(e) = statefile::save_atomic(&self.path, templates) {
            warn!(path = %self.path.display(), error = %e, "template library save failed");
        }
    }

    pub fn store(&self, goal: &str, subtasks: &[Subtask], score: f64) {
        // Reset execution state so a reused template starts clean.
        let subtasks: Vec<Subtask> = subtasks
            .iter()
            .map(|s| Subtask {
                status: SubtaskStatus::Pending,
                result: None,
                error: None,
                ..s.clone()
            })
            .collect();

        let mut templates = self.templates.lock().unwrap();
        templates.push(TaskTemplate {
            goal: goal.to_string(),
            subtasks,
            score,
            stored_at: chrono::Utc::now().to_rfc3339(),
        });
        let len = templates.len();
        if len > MAX_TEMPLATES {
            templates.drain(..len - MAX_TEMPLATES);
        }
        self.save(&templates);
        info!(goal = %goal.chars().take(60).collect::<String>(), score, "template stored");
    }

    /// Best matching template for a goal, by keyword overlap.
    pub fn lookup(&self, goal: &str) -> Option<Vec<Subtask>> {
        let templates = self.templates.lock().unwrap();
        let goal_words = keywords(goal);
        if goal_words.is_empty() {
            return None;
        }

        templates
            .iter()
            .map(|t| {
                let template_words = keywords(&t.goal);
                let overlap = goal_words
                    .iter()
                    .filter(|w| template_words.contains(*w))
                    .count();
                (overlap as f64 / goal_words.len() as f64, t)
            })
            .filter(|(similarity, _)| *similarity >= MATCH_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, t)| t.subtasks.clone())
    }

    pub fn len(&self) -> usize {
        self.templates.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn keywords(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(String::from)
        .collect()
}

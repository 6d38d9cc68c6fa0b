//! Curriculum Model
//!
//! A curriculum is an ordered list of milestones. Declaration order is the
//! canonical progression order: it breaks ties when bootstrapping a session
//! and drives the forward scan for the next milestone after a completion.
//! A `Curriculum` is validated once on construction and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

/// Identifier of a milestone within a curriculum (e.g. `"m1"`).
pub type MilestoneId = String;

/// Errors raised while building or loading a curriculum.
#[derive(Debug, thiserror::Error)]
pub enum CurriculumError {
    #[error("Curriculum must contain at least one milestone")]
    Empty,
    #[error("Duplicate milestone id: {0}")]
    DuplicateId(MilestoneId),
    #[error("Milestone '{milestone}' references unknown prerequisite '{prerequisite}'")]
    UnknownPrerequisite {
        milestone: MilestoneId,
        prerequisite: MilestoneId,
    },
    #[error("Milestone '{0}' lists itself as a prerequisite")]
    SelfPrerequisite(MilestoneId),
    #[error("Prerequisite cycle detected involving milestone '{0}'")]
    Cycle(MilestoneId),
    #[error("Failed to read curriculum file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse curriculum file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A discrete curriculum checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub prerequisites: BTreeSet<MilestoneId>,
}

impl Milestone {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        prerequisites: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// True when every prerequisite is contained in `completed`.
    pub fn is_unlocked(&self, completed: &BTreeSet<MilestoneId>) -> bool {
        self.prerequisites.is_subset(completed)
    }
}

/// Serialized shape of a curriculum, used for JSON loading before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurriculumConfig {
    name: String,
    #[serde(default)]
    description: String,
    milestones: Vec<Milestone>,
}

/// An ordered, validated sequence of milestones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Curriculum {
    name: String,
    description: String,
    milestones: Vec<Milestone>,
}

impl Curriculum {
    /// Builds a curriculum, rejecting duplicate ids, dangling or
    /// self-referencing prerequisites and prerequisite cycles.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        milestones: Vec<Milestone>,
    ) -> Result<Self, CurriculumError> {
        if milestones.is_empty() {
            return Err(CurriculumError::Empty);
        }

        let mut seen = HashSet::new();
        for milestone in &milestones {
            if !seen.insert(milestone.id.as_str()) {
                return Err(CurriculumError::DuplicateId(milestone.id.clone()));
            }
        }

        for milestone in &milestones {
            for prerequisite in &milestone.prerequisites {
                if prerequisite == &milestone.id {
                    return Err(CurriculumError::SelfPrerequisite(milestone.id.clone()));
                }
                if !seen.contains(prerequisite.as_str()) {
                    return Err(CurriculumError::UnknownPrerequisite {
                        milestone: milestone.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        detect_cycle(&milestones)?;

        Ok(Self {
            name: name.into(),
            description: description.into(),
            milestones,
        })
    }

    /// Loads and validates a curriculum from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, CurriculumError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CurriculumError> {
        let config: CurriculumConfig = serde_json::from_str(raw)?;
        Self::new(config.name, config.description, config.milestones)
    }

    /// The built-in lesson plan: a terminal tic-tac-toe game in four steps.
    pub fn tic_tac_toe() -> Self {
        let milestones = vec![
            Milestone::new(
                "m1",
                "Board Implementation",
                "Code the game board representation, board initialization with integers labelling the cells, board update, and display functions. Prefer to use a 2D array to represent the board. Display it in a 3x3 grid in terminal console.",
                &[],
            ),
            Milestone::new(
                "m2",
                "Player Input",
                "Implement functions to handle player moves. The player should be able to make a move by entering the number of the cell they want to play in.",
                &["m1"],
            ),
            Milestone::new(
                "m3",
                "Win Condition Implementation",
                "Code the win condition checks. The game should check if the player has won by getting three in a row, column, or diagonal.",
                &["m1", "m2"],
            ),
            Milestone::new(
                "m4",
                "Game Loop",
                "Implement the main game loop. The game should alternate between the two players, and the game should continue until there is a winner or the board is full.",
                &["m1", "m2", "m3"],
            ),
        ];

        Self {
            name: "Tic-Tac-Toe Game Lesson Plan".to_string(),
            description: "Build a complete tic-tac-toe game with board representation, game logic, and win conditions in a terminal game".to_string(),
            milestones,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }

    pub fn len(&self) -> usize {
        self.milestones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.milestones.is_empty()
    }

    /// Milestone ids in canonical order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.milestones.iter().map(|m| m.id.as_str())
    }

    pub fn get(&self, id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.milestones.iter().position(|m| m.id == id)
    }

    /// Display name for a milestone id, falling back to the id itself.
    pub fn display_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(|m| m.name.as_str()).unwrap_or(id)
    }

    /// First milestone in canonical order that is not completed and whose
    /// prerequisites are all completed.
    pub fn first_available(&self, completed: &BTreeSet<MilestoneId>) -> Option<&Milestone> {
        self.milestones
            .iter()
            .find(|m| !completed.contains(&m.id) && m.is_unlocked(completed))
    }

    /// Scans forward from the milestone after `id` for the next available
    /// milestone. Wraps around to the start so that an earlier milestone left
    /// open is still picked up before the curriculum is declared finished.
    pub fn next_available_after(
        &self,
        id: &str,
        completed: &BTreeSet<MilestoneId>,
    ) -> Option<&Milestone> {
        let start = self.position(id).map(|idx| idx + 1).unwrap_or(0);
        let available = |m: &&Milestone| !completed.contains(&m.id) && m.is_unlocked(completed);

        self.milestones[start..]
            .iter()
            .find(available)
            .or_else(|| self.milestones[..start].iter().find(available))
    }

    /// Ids not yet completed, in canonical order.
    pub fn remaining(&self, completed: &BTreeSet<MilestoneId>) -> Vec<MilestoneId> {
        self.milestones
            .iter()
            .filter(|m| !completed.contains(&m.id))
            .map(|m| m.id.clone())
            .collect()
    }

    /// True when every milestone of the curriculum is in `completed`.
    pub fn is_complete(&self, completed: &BTreeSet<MilestoneId>) -> bool {
        self.milestones.iter().all(|m| completed.contains(&m.id))
    }
}

/// Depth-first search over the prerequisite graph.
fn detect_cycle(milestones: &[Milestone]) -> Result<(), CurriculumError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        graph: &HashMap<&'a str, &'a Milestone>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Result<(), CurriculumError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(CurriculumError::Cycle(id.to_string())),
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        if let Some(milestone) = graph.get(id) {
            for prerequisite in &milestone.prerequisites {
                visit(prerequisite.as_str(), graph, marks)?;
            }
        }
        marks.insert(id, Mark::Done);
        Ok(())
    }

    let graph: HashMap<&str, &Milestone> = milestones.iter().map(|m| (m.id.as_str(), m)).collect();
    let mut marks = HashMap::new();
    for milestone in milestones {
        visit(milestone.id.as_str(), &graph, &mut marks)?;
    }
    Ok(())
}

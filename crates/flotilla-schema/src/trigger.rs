use crate::config::{ConfigError, OneOrMany, ScriptSection, TriggerSection};
use crate::folders::absolutize;
use crate::identity::trigger_id;
use crate::types::TriggerId;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Command filter matching every command.
pub const ALL_COMMANDS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Before,
    After,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Before => write!(f, "before"),
            Stage::After => write!(f, "after"),
        }
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "before" => Ok(Stage::Before),
            "after" => Ok(Stage::After),
            other => Err(ConfigError::InvalidTriggerStage(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    #[default]
    Halt,
    Continue,
}

impl FromStr for OnError {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "halt" => Ok(OnError::Halt),
            "continue" => Ok(OnError::Continue),
            other => Err(ConfigError::InvalidOnError(other.to_owned())),
        }
    }
}

/// One `only_on` entry.
///
/// `/expr/` is an unanchored regular expression. Any other string matches a
/// guest name equal to it, or one the string fully matches as a regular
/// expression (so `web.*` matches `web1`).
#[derive(Debug, Clone)]
pub enum GuestPattern {
    Name {
        name: String,
        anchored: Option<Regex>,
    },
    Regex(Regex),
}

impl GuestPattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let expr = &pattern[1..pattern.len() - 1];
            let regex = Regex::new(expr).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_owned(),
                message: e.to_string(),
            })?;
            return Ok(GuestPattern::Regex(regex));
        }
        Ok(GuestPattern::Name {
            name: pattern.to_owned(),
            anchored: Regex::new(&format!("^(?:{pattern})$")).ok(),
        })
    }

    pub fn matches(&self, guest_name: &str) -> bool {
        match self {
            GuestPattern::Name { name, anchored } => {
                name == guest_name || anchored.as_ref().is_some_and(|r| r.is_match(guest_name))
            }
            GuestPattern::Regex(regex) => regex.is_match(guest_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline(String),
    Path(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSpec {
    pub source: ScriptSource,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl ScriptSpec {
    fn from_section(
        label: &str,
        root: &Path,
        section: &ScriptSection,
    ) -> Result<Self, ConfigError> {
        let source = match (&section.inline, &section.path) {
            (Some(inline), None) => ScriptSource::Inline(inline.clone()),
            (None, Some(path)) => ScriptSource::Path(absolutize(root, Path::new(path))),
            _ => {
                return Err(ConfigError::InvalidScript {
                    trigger: label.to_owned(),
                    reason: "exactly one of inline or path must be set".to_owned(),
                });
            }
        };
        Ok(Self {
            source,
            args: section.args.clone(),
            env: section.env.clone(),
        })
    }
}

/// A finalized user-defined hook around a command.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub id: TriggerId,
    pub name: Option<String>,
    pub stage: Stage,
    pub commands: Vec<String>,
    pub ignore: Vec<String>,
    pub info: Option<String>,
    pub warn: Option<String>,
    pub on_error: OnError,
    pub only_on: Vec<GuestPattern>,
    pub run: Option<ScriptSpec>,
    pub run_remote: Option<ScriptSpec>,
    pub exit_codes: Vec<i32>,
}

impl Trigger {
    pub(crate) fn from_section(
        scope: &str,
        index: usize,
        root: &Path,
        section: &TriggerSection,
    ) -> Result<Self, ConfigError> {
        let stage: Stage = section.stage.parse()?;
        let commands = section.on.clone().into_vec();
        let id = trigger_id(scope, &stage.to_string(), index, &commands);
        let label = section.name.clone().unwrap_or_else(|| id.to_string());

        if section.run.is_some() && section.run_remote.is_some() {
            return Err(ConfigError::InvalidScript {
                trigger: label,
                reason: "run and run_remote are mutually exclusive".to_owned(),
            });
        }

        let only_on = section
            .only_on
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .iter()
            .map(|p| GuestPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;

        let run = section
            .run
            .as_ref()
            .map(|s| ScriptSpec::from_section(&label, root, s))
            .transpose()?;
        let run_remote = section
            .run_remote
            .as_ref()
            .map(|s| ScriptSpec::from_section(&label, root, s))
            .transpose()?;

        Ok(Self {
            id,
            name: section.name.clone(),
            stage,
            commands,
            ignore: section.ignore.clone(),
            info: section.info.clone(),
            warn: section.warn.clone(),
            on_error: section.on_error.parse()?,
            only_on,
            run,
            run_remote,
            exit_codes: section.exit_codes.clone().unwrap_or_else(|| vec![0]),
        })
    }

    /// Name if given, id otherwise. Used in messages.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn applies_to(&self, command: &str) -> bool {
        if self.ignore.iter().any(|c| c == command) {
            return false;
        }
        self.commands
            .iter()
            .any(|c| c == command || c == ALL_COMMANDS)
    }

    pub fn matches_guest(&self, guest_name: &str) -> bool {
        self.only_on.is_empty() || self.only_on.iter().any(|p| p.matches(guest_name))
    }
}

/// Ordered before/after trigger lists for one machine.
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    pub before: Vec<Trigger>,
    pub after: Vec<Trigger>,
}

impl TriggerSet {
    pub fn push(&mut self, trigger: Trigger) {
        match trigger.stage {
            Stage::Before => self.before.push(trigger),
            Stage::After => self.after.push(trigger),
        }
    }

    pub fn for_stage(&self, stage: Stage) -> &[Trigger] {
        match stage {
            Stage::Before => &self.before,
            Stage::After => &self.after,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(stage: &str, on: &[&str]) -> TriggerSection {
        TriggerSection {
            name: None,
            stage: stage.to_owned(),
            on: OneOrMany::Many(on.iter().map(|s| (*s).to_owned()).collect()),
            ignore: Vec::new(),
            info: None,
            warn: None,
            on_error: "halt".to_owned(),
            only_on: None,
            run: None,
            run_remote: None,
            exit_codes: None,
        }
    }

    #[test]
    fn plain_pattern_matches_exact_and_anchored_regex() {
        let p = GuestPattern::parse("web.*").unwrap();
        assert!(p.matches("web1"));
        assert!(!p.matches("db1"));
        assert!(!p.matches("my-web1"));

        let exact = GuestPattern::parse("db").unwrap();
        assert!(exact.matches("db"));
        assert!(!exact.matches("db2"));
    }

    #[test]
    fn slash_pattern_is_unanchored_regex() {
        let p = GuestPattern::parse("/web/").unwrap();
        assert!(p.matches("my-web1"));
        assert!(!p.matches("db1"));
    }

    #[test]
    fn invalid_slash_pattern_is_rejected() {
        assert!(matches!(
            GuestPattern::parse("/web[/"),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn unparsable_plain_pattern_still_matches_literally() {
        let p = GuestPattern::parse("web[").unwrap();
        assert!(p.matches("web["));
        assert!(!p.matches("web1"));
    }

    #[test]
    fn invalid_stage_is_rejected() {
        let err = Trigger::from_section("p", 0, Path::new("/"), &section("during", &["up"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTriggerStage(s) if s == "during"));
    }

    #[test]
    fn all_wildcard_and_ignore() {
        let mut s = section("before", &["all"]);
        s.ignore = vec!["destroy".to_owned()];
        let t = Trigger::from_section("p", 0, Path::new("/"), &s).unwrap();
        assert!(t.applies_to("up"));
        assert!(t.applies_to("halt"));
        assert!(!t.applies_to("destroy"));
    }

    #[test]
    fn run_and_run_remote_are_exclusive() {
        let mut s = section("after", &["up"]);
        s.run = Some(ScriptSection {
            inline: Some("true".to_owned()),
            ..ScriptSection::default()
        });
        s.run_remote = Some(ScriptSection {
            inline: Some("true".to_owned()),
            ..ScriptSection::default()
        });
        assert!(Trigger::from_section("p", 0, Path::new("/"), &s).is_err());
    }

    #[test]
    fn script_requires_exactly_one_source() {
        let mut s = section("after", &["up"]);
        s.run = Some(ScriptSection::default());
        assert!(Trigger::from_section("p", 0, Path::new("/"), &s).is_err());
    }

    #[test]
    fn script_path_resolves_against_root() {
        let mut s = section("after", &["up"]);
        s.run = Some(ScriptSection {
            path: Some("scripts/hook.sh".to_owned()),
            ..ScriptSection::default()
        });
        let t = Trigger::from_section("p", 0, Path::new("/proj"), &s).unwrap();
        assert_eq!(
            t.run.unwrap().source,
            ScriptSource::Path(PathBuf::from("/proj/scripts/hook.sh"))
        );
    }

    #[test]
    fn defaults() {
        let s = section("before", &["up"]);
        let t = Trigger::from_section("p", 0, Path::new("/"), &s).unwrap();
        assert_eq!(t.on_error, OnError::Halt);
        assert_eq!(t.exit_codes, vec![0]);
        assert!(t.matches_guest("anything"));
        assert_eq!(t.label(), t.id.as_str());
    }

    #[test]
    fn trigger_set_splits_by_stage() {
        let mut set = TriggerSet::default();
        let root = Path::new("/");
        set.push(Trigger::from_section("p", 0, root, &section("before", &["up"])).unwrap());
        set.push(Trigger::from_section("p", 1, root, &section("after", &["up"])).unwrap());
        assert_eq!(set.for_stage(Stage::Before).len(), 1);
        assert_eq!(set.for_stage(Stage::After).len(), 1);
    }
}

use regex::Regex;

pub const DEFAULT_CODEGEN_PATTERN: &str = r"(?mi)^/codegen\s*$";
pub const DEFAULT_DRY_RUN_PATTERN: &str = r"(?mi)^/codegen-dryrun\s*$";
pub const DEFAULT_LABEL: &str = "post-merge/codegen";

/// Comment commands and the marker label the bot reacts to. Compiled once at
/// startup.
#[derive(Clone, Debug)]
pub struct Triggers {
    codegen: Regex,
    dry_run: Regex,
    label: String,
}

impl Triggers {
    pub fn new(codegen: &str, dry_run: &str, label: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Triggers {
            codegen: Regex::new(codegen)?,
            dry_run: Regex::new(dry_run)?,
            label: label.into(),
        })
    }

    pub fn is_codegen(&self, comment: &str) -> bool {
        self.codegen.is_match(comment)
    }

    pub fn is_dry_run(&self, comment: &str) -> bool {
        self.dry_run.is_match(comment)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

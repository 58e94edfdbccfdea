//! Feature Extractor
//!
//! `extract(raw_command, context) -> FeatureVector`, pure and total.
//! No clock, no randomness, no filesystem access: everything environmental
//! (home directory, current branch, session history) arrives in
//! [`ExtractionContext`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants;
use crate::logic::command::parser::{self, Operator, ParsedCommand, Segment, SUBSTITUTION_PLACEHOLDER};

use super::patterns::{self, VerbClass};
use super::vector::FeatureVector;

/// Arguments shorter than this are ignored for entropy
const ENTROPY_MIN_LEN: usize = 8;

// ============================================================================
// CONTEXT
// ============================================================================

/// Everything the extractor needs besides the command itself
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub working_directory: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub current_branch: Option<String>,
    pub protected_branches: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    /// Times this command was seen earlier in the session
    pub prior_occurrences: u32,
}

impl Default for ExtractionContext {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from("/"),
            home_dir: None,
            current_branch: None,
            protected_branches: constants::DEFAULT_PROTECTED_BRANCHES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            aliases: BTreeMap::new(),
            prior_occurrences: 0,
        }
    }
}

impl ExtractionContext {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            ..Default::default()
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home_dir = Some(home.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.current_branch = Some(branch.into());
        self
    }

    pub fn with_prior_occurrences(mut self, count: u32) -> Self {
        self.prior_occurrences = count;
        self
    }

    fn is_protected(&self, branch: &str) -> bool {
        patterns::is_protected_branch(branch, &self.protected_branches)
    }

    fn on_protected_branch(&self) -> bool {
        self.current_branch
            .as_deref()
            .map_or(false, |b| self.is_protected(b))
    }
}

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// Facts collected across all segments before they become vector values
#[derive(Debug, Default)]
struct Facts {
    all_known: bool,
    max_class: Option<VerbClass>,
    redirect_overwrite: bool,
    recursive_delete: bool,
    force: bool,
    truncate: bool,
    root_target: bool,
    system_target: bool,
    path_count: usize,
    outside_cwd: bool,
    credential: bool,
    force_push: bool,
    protected_branch: bool,
    hard_reset: bool,
    branch_delete: bool,
    history_rewrite: bool,
    privilege: bool,
    permission: bool,
    network: bool,
    pipe_to_shell: bool,
    kill: bool,
    device_write: bool,
    wildcard: bool,
    max_entropy: f32,
    arg_count: usize,
}

impl Facts {
    fn raise_class(&mut self, class: VerbClass) {
        self.max_class = Some(self.max_class.map_or(class, |c| c.max(class)));
    }

    fn target(&mut self, arg: &str, ctx: &ExtractionContext, modifying: bool) {
        if !patterns::is_path_like(arg) {
            return;
        }
        self.path_count += 1;
        if !modifying {
            return;
        }
        let traits = patterns::classify_path(arg, &ctx.working_directory, ctx.home_dir.as_deref());
        self.root_target |= traits.root_like;
        self.system_target |= traits.system;
        self.outside_cwd |= traits.outside_cwd;
        self.device_write |= traits.block_device;
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Parse and extract
pub fn extract(raw_command: &str, ctx: &ExtractionContext) -> FeatureVector {
    let parsed = parser::parse(raw_command);
    extract_parsed(raw_command, &parsed, ctx)
}

/// Extract from an already parsed command
pub fn extract_parsed(raw_command: &str, parsed: &ParsedCommand, ctx: &ExtractionContext) -> FeatureVector {
    let segments = parsed.all_segments();
    let unparseable = parsed.is_unparseable();
    let operators = parsed.all_operators();

    let mut facts = Facts {
        all_known: true,
        ..Default::default()
    };
    let mut saw_verb = false;

    for segment in &segments {
        saw_verb |= segment.verb.is_some();
        segment_facts(segment, ctx, &mut facts);
    }

    let mut v = FeatureVector::new();
    v.set_flag("verb_known", saw_verb && facts.all_known && !unparseable);
    let class = facts.max_class.unwrap_or(VerbClass::ReadOnly);
    v.set_by_name("verb_risk_class", class as u8 as f32);
    v.set_flag("unparseable", unparseable);

    v.set_by_name("segment_count", segments.len() as f32);
    v.set_flag("has_pipe", operators.contains(&Operator::Pipe));
    v.set_flag("has_chain", operators.iter().any(Operator::is_chain));
    v.set_flag("has_command_substitution", parsed.total_substitutions() > 0);
    v.set_flag("has_redirect_overwrite", facts.redirect_overwrite);

    v.set_flag("recursive_delete", facts.recursive_delete);
    v.set_flag("force_flag", facts.force);
    v.set_flag("truncate_or_overwrite", facts.truncate);
    v.set_flag("root_path_target", facts.root_target);
    v.set_flag("system_path_target", facts.system_target);
    v.set_by_name("target_path_count", facts.path_count as f32);
    v.set_flag("outside_cwd_target", facts.outside_cwd);
    v.set_flag("credential_access", facts.credential);

    v.set_flag("vcs_force_push", facts.force_push);
    v.set_flag("vcs_protected_branch", facts.protected_branch);
    v.set_flag("vcs_hard_reset", facts.hard_reset);
    v.set_flag("vcs_branch_delete", facts.branch_delete);
    v.set_flag("vcs_history_rewrite", facts.history_rewrite);

    v.set_flag("privilege_escalation", facts.privilege);
    v.set_flag("permission_change", facts.permission);
    v.set_flag("network_egress", facts.network);
    v.set_flag("pipe_to_shell", facts.pipe_to_shell);
    v.set_flag("process_kill", facts.kill);
    v.set_flag("disk_device_write", facts.device_write);
    v.set_flag("fork_bomb", patterns::is_fork_bomb(raw_command));

    v.set_flag("wildcard_usage", facts.wildcard);
    v.set_by_name("argument_entropy", (facts.max_entropy * 1000.0).round() / 1000.0);
    v.set_by_name("arg_count", facts.arg_count as f32);
    v.set_by_name("session_frequency", ctx.prior_occurrences as f32);

    v
}

// ============================================================================
// PER-SEGMENT ANALYSIS
// ============================================================================

fn segment_facts(segment: &Segment, ctx: &ExtractionContext, facts: &mut Facts) {
    if segment
        .wrappers
        .iter()
        .any(|w| patterns::PRIVILEGE_VERBS.contains(&w.as_str()))
    {
        facts.privilege = true;
    }

    for redirect in &segment.redirects {
        let target = redirect.target.as_str();
        if patterns::HARMLESS_DEVICES.contains(&target) {
            continue;
        }
        if !redirect.append {
            facts.redirect_overwrite = true;
        }
        if patterns::is_block_device(target) {
            facts.device_write = true;
        }
        facts.credential |= patterns::is_credential_path(target);
        facts.target(target, ctx, true);
    }

    let Some(raw_verb) = segment.verb.as_deref() else {
        // bare `> file` truncates
        if segment.redirects.iter().any(|r| !r.append) {
            facts.truncate = true;
        }
        return;
    };

    let verb = patterns::resolve_alias(raw_verb, &ctx.aliases);
    let args = &segment.args;

    let mut class = match patterns::verb_class(&verb) {
        Some(class) => class,
        None => {
            facts.all_known = false;
            VerbClass::Modifying
        }
    };
    if verb == "git" {
        class = git_facts(args, ctx, facts);
    }
    facts.raise_class(class);

    facts.arg_count += args.len();
    for arg in args {
        facts.wildcard |= patterns::has_wildcard(arg);
        facts.credential |= patterns::is_credential_path(arg);
        if arg.chars().count() >= ENTROPY_MIN_LEN {
            facts.max_entropy = facts.max_entropy.max(patterns::shannon_entropy(arg));
        }
    }

    if patterns::PIPE_INTERPRETERS.contains(&verb.as_str())
        && (segment.joined_by == Some(Operator::Pipe)
            || args.iter().any(|a| a.contains(SUBSTITUTION_PLACEHOLDER)))
    {
        facts.pipe_to_shell = true;
    }

    verb_facts(&verb, class, args, ctx, facts);
}

fn verb_facts(verb: &str, class: VerbClass, args: &[String], ctx: &ExtractionContext, facts: &mut Facts) {
    let modifying = class >= VerbClass::Modifying;
    let positionals = patterns::positional(args);

    match verb {
        "rm" | "srm" => {
            facts.recursive_delete |= patterns::has_flag(args, 'r', "recursive") || patterns::has_flag(args, 'R', "recursive");
            facts.force |= patterns::has_flag(args, 'f', "force");
        }
        "rmdir" | "unlink" | "cp" | "mv" | "ln" => {
            facts.force |= patterns::has_flag(args, 'f', "force");
        }
        "find" => {
            let deletes = args.iter().any(|a| a == "-delete")
                || (args.iter().any(|a| a == "-exec" || a == "-execdir") && args.iter().any(|a| a == "rm"));
            facts.recursive_delete |= deletes;
        }
        "shred" | "truncate" => facts.truncate = true,
        "sed" | "perl" => {
            facts.truncate |= args.iter().any(|a| a == "-i" || a.starts_with("-i") || a == "--in-place");
        }
        "dd" => {
            for arg in args {
                if let Some(target) = arg.strip_prefix("of=") {
                    facts.truncate = true;
                    facts.device_write |= patterns::is_block_device(target);
                    facts.target(target, ctx, true);
                }
            }
            return;
        }
        "su" | "sudo" | "doas" | "pkexec" | "runuser" => facts.privilege = true,
        "kill" | "pkill" | "killall" | "xkill" => {
            facts.kill = true;
            return;
        }
        "chmod" | "chown" | "chgrp" | "chattr" | "setfacl" => {
            facts.permission = true;
            facts.force |= patterns::has_flag(args, 'f', "force");
            if verb == "chmod" && positionals.first().map_or(false, |m| is_setuid_mode(m)) {
                facts.privilege = true;
            }
            // first positional is the mode / owner
            for path in positionals.iter().skip(1) {
                facts.target(path, ctx, true);
            }
            return;
        }
        "scp" | "sftp" => facts.network = true,
        "rsync" => {
            facts.network |= positionals.iter().any(|p| is_remote_spec(p));
        }
        "git" => return,
        v if patterns::NETWORK_VERBS.contains(&v) => facts.network = true,
        v if v.starts_with("mkfs") => facts.device_write = true,
        v if patterns::DEVICE_TOOLS.contains(&v) => {
            facts.device_write |= positionals.iter().any(|p| patterns::is_block_device(p));
        }
        _ => {
            if args.iter().any(|a| a == "--force") {
                facts.force = modifying;
            }
        }
    }

    if patterns::NETWORK_VERBS.contains(&verb) {
        // URLs and hosts are not filesystem targets
        return;
    }
    for path in positionals {
        facts.target(path, ctx, modifying);
    }
}

/// Returns the effective class of the git invocation
fn git_facts(args: &[String], ctx: &ExtractionContext, facts: &mut Facts) -> VerbClass {
    let Some((sub, rest)) = patterns::git_subcommand(args) else {
        return VerbClass::ReadOnly;
    };

    if patterns::GIT_NETWORK_SUBCOMMANDS.contains(&sub) {
        facts.network = true;
    }

    match sub {
        "push" => {
            let info = patterns::parse_push(rest);
            facts.force_push |= info.force;
            facts.branch_delete |= info.delete;

            let protected = if info.all_refs {
                info.force || info.delete
            } else if info.branches.is_empty() {
                match ctx.current_branch.as_deref() {
                    Some(branch) => ctx.is_protected(branch),
                    // unknown target of a force push counts as protected
                    None => info.force,
                }
            } else {
                info.branches.iter().any(|b| ctx.is_protected(b))
            };
            facts.protected_branch |= protected;
            VerbClass::Modifying
        }
        "reset" => {
            if rest.iter().any(|a| a == "--hard") {
                facts.hard_reset = true;
                facts.protected_branch |= ctx.on_protected_branch();
            }
            VerbClass::Modifying
        }
        "clean" => {
            facts.hard_reset |= patterns::has_flag(rest, 'f', "force");
            VerbClass::Modifying
        }
        "checkout" | "restore" => {
            let discards = rest.iter().any(|a| a == "." || a == "-f" || a == "--force")
                && !rest.iter().any(|a| a == "--staged");
            facts.hard_reset |= discards;
            VerbClass::Modifying
        }
        "stash" => {
            facts.hard_reset |= matches!(rest.first().map(String::as_str), Some("drop") | Some("clear"));
            VerbClass::Modifying
        }
        "branch" => {
            let deleting = patterns::has_flag(rest, 'd', "delete") || patterns::has_flag(rest, 'D', "delete");
            if deleting {
                facts.branch_delete = true;
                facts.protected_branch |= patterns::positional(rest).iter().any(|b| ctx.is_protected(b));
                VerbClass::Modifying
            } else if patterns::positional(rest).is_empty() {
                VerbClass::ReadOnly
            } else {
                VerbClass::Modifying
            }
        }
        "update-ref" => {
            facts.branch_delete |= rest.iter().any(|a| a == "-d");
            VerbClass::Modifying
        }
        "rebase" | "filter-branch" | "filter-repo" => {
            facts.history_rewrite = true;
            facts.protected_branch |= ctx.on_protected_branch();
            VerbClass::Modifying
        }
        "commit" => {
            facts.history_rewrite |= rest.iter().any(|a| a == "--amend");
            VerbClass::Modifying
        }
        "reflog" => {
            if matches!(rest.first().map(String::as_str), Some("expire") | Some("delete")) {
                facts.history_rewrite = true;
                VerbClass::Modifying
            } else {
                VerbClass::ReadOnly
            }
        }
        "rm" => {
            facts.recursive_delete |= patterns::has_flag(rest, 'r', "recursive") && !rest.iter().any(|a| a == "--cached");
            facts.force |= patterns::has_flag(rest, 'f', "force");
            VerbClass::Modifying
        }
        s if patterns::GIT_READ_SUBCOMMANDS.contains(&s) => VerbClass::ReadOnly,
        _ => VerbClass::Modifying,
    }
}

/// `4755`, `u+s`, `g+s`
fn is_setuid_mode(mode: &str) -> bool {
    if mode.contains("+s") {
        return true;
    }
    mode.len() == 4 && mode.chars().all(|c| c.is_ascii_digit()) && matches!(mode.chars().next(), Some('2' | '4' | '6'))
}

/// `host:path` or `user@host:path`, not a local path with a colon
fn is_remote_spec(arg: &str) -> bool {
    match arg.split_once(':') {
        Some((host, _)) => !host.is_empty() && !host.contains('/') && !Path::new(host).is_absolute(),
        None => false,
    }
}

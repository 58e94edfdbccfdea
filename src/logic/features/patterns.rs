//! Pattern Tables
//!
//! Verb classes, aliases, path categories and VCS argument parsing used by
//! the extractor. Everything here is static data or pure string logic.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

// ============================================================================
// VERB CLASSES
// ============================================================================

/// Risk class of a verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerbClass {
    ReadOnly = 0,
    Modifying = 1,
    Destructive = 2,
    System = 3,
}

const READ_ONLY_VERBS: &[&str] = &[
    "ls", "cat", "head", "tail", "less", "more", "grep", "egrep", "fgrep", "rg", "ag", "find", "fd",
    "pwd", "echo", "printf", "which", "whereis", "whoami", "id", "date", "wc", "sort", "uniq", "diff",
    "cmp", "stat", "file", "du", "df", "tree", "printenv", "uname", "hostname", "ps", "top", "htop",
    "cd", "true", "false", "test", "[", "sleep", "basename", "dirname", "realpath", "readlink", "jq",
    "yq", "awk", "cut", "tr", "man", "type", "history", "clear", "exit", "export", "alias", "source",
    ".", "column", "nl", "od", "xxd", "hexdump", "md5sum", "sha256sum", "shasum", "base64", "seq",
    "yes", "env", "locale", "free", "uptime", "lsof", "tty", "groups", "bat", "fzf", ":", "set",
    "unset", "read", "wait", "jobs", "fg", "bg", "pushd", "popd", "dirs", "shopt", "let", "local",
    "return", "break", "continue", "for", "in", "fi", "done", "esac", "case", "function",
];

const MODIFYING_VERBS: &[&str] = &[
    "mkdir", "touch", "cp", "mv", "ln", "tee", "sed", "perl", "make", "cmake", "ninja", "cargo",
    "rustc", "rustup", "npm", "npx", "yarn", "pnpm", "bun", "deno", "node", "pip", "pipx", "uv",
    "poetry", "python", "ruby", "gem", "bundle", "go", "gcc", "g++", "clang", "javac", "java", "mvn",
    "gradle", "dotnet", "git", "docker", "podman", "kubectl", "helm", "tar", "zip", "unzip", "gzip",
    "gunzip", "xz", "bzip2", "patch", "rsync", "code", "vim", "vi", "nvim", "nano", "emacs",
    "terraform", "brew", "apt", "apt-get", "dnf", "yum", "pacman", "curl", "wget", "ssh", "scp",
    "sftp", "nc", "ncat", "netcat", "telnet", "ftp", "socat", "http", "aria2c", "pytest", "jest",
    "tsc", "eslint", "prettier", "black", "ruff", "mypy", "gh", "sh", "bash", "zsh", "dash", "ksh",
    "fish", "eval", "xdg-open", "open", "install", "convert", "ffmpeg", "sqlite3", "psql", "mysql",
    "redis-cli", "crontab", "launchctl", "pre-commit", "split", "mktemp",
];

const DESTRUCTIVE_VERBS: &[&str] = &[
    "rm", "rmdir", "unlink", "shred", "truncate", "dd", "chmod", "chown", "chgrp", "chattr",
    "setfacl", "kill", "pkill", "killall", "xkill", "wipefs", "srm",
];

const SYSTEM_VERBS: &[&str] = &[
    "sudo", "su", "doas", "pkexec", "passwd", "visudo", "useradd", "userdel", "usermod", "groupadd",
    "groupdel", "shutdown", "reboot", "halt", "poweroff", "init", "systemctl", "service", "mount",
    "umount", "fdisk", "sfdisk", "parted", "gdisk", "mkswap", "swapon", "swapoff", "iptables",
    "nft", "ufw", "modprobe", "insmod", "rmmod", "sysctl", "launchd", "diskutil", "format",
];

/// Built-in aliases (`alias -> verb`)
const BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("ll", "ls"),
    ("la", "ls"),
    ("l", "ls"),
    ("python3", "python"),
    ("python2", "python"),
    ("pip3", "pip"),
    ("gti", "git"),
    ("g", "git"),
    ("k", "kubectl"),
    ("vim.basic", "vim"),
];

/// Class of a resolved verb, `None` when unknown
pub fn verb_class(verb: &str) -> Option<VerbClass> {
    if verb.starts_with("mkfs") {
        return Some(VerbClass::System);
    }
    if SYSTEM_VERBS.contains(&verb) {
        Some(VerbClass::System)
    } else if DESTRUCTIVE_VERBS.contains(&verb) {
        Some(VerbClass::Destructive)
    } else if MODIFYING_VERBS.contains(&verb) {
        Some(VerbClass::Modifying)
    } else if READ_ONLY_VERBS.contains(&verb) {
        Some(VerbClass::ReadOnly)
    } else {
        None
    }
}

/// Apply configured aliases first, then built-in ones.
/// An alias whose value has arguments (`ll = "ls -la"`) resolves to its first word.
pub fn resolve_alias(verb: &str, configured: &BTreeMap<String, String>) -> String {
    if let Some(target) = configured.get(verb) {
        if let Some(first) = target.split_whitespace().next() {
            return first.to_string();
        }
    }
    BUILTIN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == verb)
        .map(|(_, target)| target.to_string())
        .unwrap_or_else(|| verb.to_string())
}

pub const NETWORK_VERBS: &[&str] = &[
    "curl", "wget", "ssh", "scp", "sftp", "nc", "ncat", "netcat", "telnet", "ftp", "socat", "http",
    "aria2c",
];

pub const PRIVILEGE_VERBS: &[&str] = &["sudo", "su", "doas", "pkexec", "runuser"];

/// Interpreters that execute whatever is piped into them
pub const PIPE_INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "dash", "ksh", "fish", "python", "node", "perl", "ruby", "php", "eval",
    "source", ".",
];

pub const DEVICE_TOOLS: &[&str] = &["fdisk", "sfdisk", "parted", "gdisk", "wipefs", "mkswap"];

// ============================================================================
// FLAGS
// ============================================================================

/// `-rf` contains `r`, `--recursive` matches `recursive`
pub fn has_flag(args: &[String], short: char, long: &str) -> bool {
    for arg in args {
        if arg == "--" {
            break;
        }
        if let Some(name) = arg.strip_prefix("--") {
            let name = name.split('=').next().unwrap_or(name);
            if name == long {
                return true;
            }
        } else if let Some(cluster) = arg.strip_prefix('-') {
            if !cluster.is_empty()
                && cluster.chars().all(|c| c.is_ascii_alphanumeric())
                && cluster.contains(short)
            {
                return true;
            }
        }
    }
    false
}

/// Positional arguments (not options), stopping option parsing at `--`
pub fn positional(args: &[String]) -> Vec<&str> {
    let mut out = Vec::new();
    let mut options_done = false;
    for arg in args {
        if !options_done && arg == "--" {
            options_done = true;
            continue;
        }
        if !options_done && arg.starts_with('-') && arg.len() > 1 {
            continue;
        }
        out.push(arg.as_str());
    }
    out
}

// ============================================================================
// PATH CATEGORIES
// ============================================================================

const SYSTEM_PREFIXES: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/lib", "/lib32", "/lib64", "/boot", "/var", "/sys", "/proc",
    "/dev", "/opt", "/root", "/srv", "/System", "/Library", "/Applications", "/private/etc",
    "/private/var",
];

const SCRATCH_PREFIXES: &[&str] = &["/tmp", "/var/tmp", "/private/tmp", "/dev/shm"];

/// Pseudo-devices that never count as a file target
pub const HARMLESS_DEVICES: &[&str] = &["/dev/null", "/dev/stdout", "/dev/stderr", "/dev/tty", "/dev/zero"];

static BLOCK_DEVICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/dev/(sd[a-z]|hd[a-z]|vd[a-z]|xvd[a-z]|nvme\d|mmcblk\d|disk\d|rdisk\d|md\d|dm-\d|mapper/|loop\d)")
        .expect("static pattern compiles")
});

static CREDENTIAL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(^|/)(\.ssh(/|$)|id_(rsa|dsa|ecdsa|ed25519)|\.aws/credentials|\.aws/config|\.netrc|\.pgpass|\.gnupg|\.kube/config|\.docker/config\.json|\.npmrc|\.pypirc|\.git-credentials|credentials\.json|\.env(\.[\w.-]+)?$|shadow$|gshadow$|sudoers|[\w.-]+\.(pem|key|p12|pfx|keystore|jks)$)",
    )
    .expect("static pattern compiles")
});

/// Where a path argument points
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathTraits {
    pub root_like: bool,
    pub system: bool,
    pub outside_cwd: bool,
    pub block_device: bool,
}

/// Looks like a path rather than a value (`-n`, `5`, `user@host`)
pub fn is_path_like(arg: &str) -> bool {
    if arg.is_empty() || arg.starts_with('-') || arg.contains("://") {
        return false;
    }
    arg.starts_with('/')
        || arg.starts_with('~')
        || arg.starts_with('.')
        || arg.starts_with("$HOME")
        || arg.starts_with("${HOME}")
        || arg.contains('/')
        || arg.contains('*')
        || arg.contains('.')
}

/// Lexical classification; never touches the filesystem
pub fn classify_path(arg: &str, cwd: &Path, home: Option<&Path>) -> PathTraits {
    let mut traits = PathTraits::default();
    let trimmed = arg.trim_end_matches('/');

    if matches!(
        arg,
        "/" | "/*" | "/." | "//" | "~" | "~/" | "~/*" | "$HOME" | "${HOME}" | "$HOME/" | "${HOME}/" | "$HOME/*" | "${HOME}/*"
    ) || (arg.starts_with('/') && trimmed.is_empty())
    {
        traits.root_like = true;
    }

    let expanded = expand_home(arg, home);
    if let Some(home) = home {
        if expanded == home {
            traits.root_like = true;
        }
    }

    let absolute = if expanded.is_absolute() {
        normalize(&expanded)
    } else {
        normalize(&cwd.join(&expanded))
    };

    if absolute == Path::new("/") {
        traits.root_like = true;
    }

    let abs_str = absolute.to_string_lossy();
    if HARMLESS_DEVICES.contains(&abs_str.as_ref()) {
        return PathTraits::default();
    }
    traits.block_device = BLOCK_DEVICE.is_match(&abs_str);

    let under = |prefix: &str| abs_str == prefix || abs_str.starts_with(&format!("{}/", prefix));
    let scratch = SCRATCH_PREFIXES.iter().any(|p| under(p));
    if !scratch && SYSTEM_PREFIXES.iter().any(|p| under(p)) {
        traits.system = true;
    }

    if !scratch && !absolute.starts_with(normalize(cwd)) {
        traits.outside_cwd = true;
    }

    traits
}

pub fn is_credential_path(arg: &str) -> bool {
    CREDENTIAL_PATH.is_match(arg)
}

pub fn is_block_device(arg: &str) -> bool {
    BLOCK_DEVICE.is_match(arg)
}

fn expand_home(arg: &str, home: Option<&Path>) -> PathBuf {
    let rest = arg
        .strip_prefix("${HOME}")
        .or_else(|| arg.strip_prefix("$HOME"))
        .or_else(|| arg.strip_prefix('~'));
    match (rest, home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        (Some(rest), None) => PathBuf::from("/home/user").join(rest.trim_start_matches('/')),
        _ => PathBuf::from(arg),
    }
}

/// Resolve `.` and `..` without following symlinks
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

// ============================================================================
// VCS
// ============================================================================

/// Split `git [global options] <subcommand> <args>`
pub fn git_subcommand(args: &[String]) -> Option<(&str, &[String])> {
    let mut idx = 0;
    while let Some(arg) = args.get(idx) {
        match arg.as_str() {
            "-C" | "-c" | "--git-dir" | "--work-tree" | "--namespace" => idx += 2,
            a if a.starts_with('-') => idx += 1,
            sub => return Some((sub, &args[idx + 1..])),
        }
    }
    None
}

/// Does `branch` match a configured name or `prefix/*` glob
pub fn is_protected_branch(branch: &str, protected: &[String]) -> bool {
    let branch = branch.trim_start_matches("refs/heads/");
    protected.iter().any(|p| match p.strip_suffix("/*") {
        Some(prefix) => branch.starts_with(&format!("{}/", prefix)),
        None => p == branch,
    })
}

/// Facts about one `git push`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushInfo {
    pub force: bool,
    pub delete: bool,
    pub all_refs: bool,
    /// Destination branches named on the command line
    pub branches: Vec<String>,
}

pub fn parse_push(args: &[String]) -> PushInfo {
    let mut info = PushInfo::default();
    let mut positionals = Vec::new();
    let mut idx = 0;
    while let Some(arg) = args.get(idx) {
        match arg.as_str() {
            "-f" | "--force" | "--force-with-lease" | "--force-if-includes" => info.force = true,
            a if a.starts_with("--force-with-lease=") => info.force = true,
            "-d" | "--delete" => info.delete = true,
            "--all" | "--mirror" | "--branches" => info.all_refs = true,
            "-o" | "--push-option" | "--repo" | "--receive-pack" | "--exec" => idx += 1,
            a if a.starts_with("--") => {}
            a if a.starts_with('-') && a.len() > 1 => {
                if a[1..].contains('f') {
                    info.force = true;
                }
                if a[1..].contains('d') {
                    info.delete = true;
                }
            }
            a => positionals.push(a.to_string()),
        }
        idx += 1;
    }

    // first positional is the remote
    for refspec in positionals.iter().skip(1) {
        let mut spec = refspec.as_str();
        if let Some(stripped) = spec.strip_prefix('+') {
            info.force = true;
            spec = stripped;
        }
        let dest = match spec.split_once(':') {
            Some((src, dst)) => {
                if src.is_empty() {
                    info.delete = true;
                }
                dst
            }
            None => spec,
        };
        if !dest.is_empty() && dest != "HEAD" {
            info.branches.push(dest.trim_start_matches("refs/heads/").to_string());
        }
    }
    info
}

pub const GIT_NETWORK_SUBCOMMANDS: &[&str] = &["push", "fetch", "pull", "clone", "ls-remote"];

pub const GIT_READ_SUBCOMMANDS: &[&str] = &[
    "status", "log", "diff", "show", "blame", "grep", "ls-files", "rev-parse", "describe",
    "shortlog", "reflog", "whatchanged", "config", "help", "version",
];

// ============================================================================
// ARGUMENTS
// ============================================================================

/// Shannon entropy in bits per character
pub fn shannon_entropy(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    for c in text.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }
    counts
        .values()
        .map(|&n| {
            let p = n as f32 / total as f32;
            -p * p.log2()
        })
        .sum()
}

pub fn has_wildcard(arg: &str) -> bool {
    arg.contains('*') || arg.contains('?') || (arg.contains('[') && arg.contains(']'))
}

static FORK_BOMB_CLASSIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;?\s*:")
        .expect("static pattern compiles")
});

static FUNCTION_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z_][\w]*)\s*\(\s*\)\s*\{([^}]*)\}")
        .expect("static pattern compiles")
});

/// A function that pipes into itself in the background
pub fn is_fork_bomb(raw: &str) -> bool {
    if FORK_BOMB_CLASSIC.is_match(raw) {
        return true;
    }
    FUNCTION_DEF.captures_iter(raw).any(|caps| {
        let name = &caps[1];
        let body: String = caps[2].chars().filter(|c| !c.is_whitespace()).collect();
        body.contains(&format!("{}|{}", name, name)) && body.contains('&')
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_verb_classes() {
        assert_eq!(verb_class("ls"), Some(VerbClass::ReadOnly));
        assert_eq!(verb_class("cmp"), Some(VerbClass::ReadOnly));
        assert_eq!(verb_class("cargo"), Some(VerbClass::Modifying));
        assert_eq!(verb_class("rm"), Some(VerbClass::Destructive));
        assert_eq!(verb_class("mkfs.ext4"), Some(VerbClass::System));
        assert_eq!(verb_class("frobnicate"), None);
    }

    #[test]
    fn test_verb_tables_disjoint() {
        let tables = [READ_ONLY_VERBS, MODIFYING_VERBS, DESTRUCTIVE_VERBS, SYSTEM_VERBS];
        for (i, a) in tables.iter().enumerate() {
            for b in &tables[i + 1..] {
                for verb in a.iter() {
                    assert!(!b.contains(verb), "`{}` listed in two verb classes", verb);
                }
            }
        }
    }

    #[test]
    fn test_aliases() {
        let mut configured = BTreeMap::new();
        configured.insert("gs".to_string(), "git status".to_string());
        assert_eq!(resolve_alias("ll", &configured), "ls");
        assert_eq!(resolve_alias("gs", &configured), "git");
        assert_eq!(resolve_alias("cargo", &configured), "cargo");
    }

    #[test]
    fn test_has_flag() {
        assert!(has_flag(&args(&["-rf", "x"]), 'r', "recursive"));
        assert!(has_flag(&args(&["-fR", "x"]), 'f', "force"));
        assert!(has_flag(&args(&["--recursive", "x"]), 'r', "recursive"));
        assert!(!has_flag(&args(&["--", "-rf"]), 'r', "recursive"));
        assert!(!has_flag(&args(&["file-r"]), 'r', "recursive"));
    }

    #[test]
    fn test_classify_path() {
        let cwd = Path::new("/home/dev/project");
        let home = Some(Path::new("/home/dev"));

        assert!(classify_path("/", cwd, home).root_like);
        assert!(classify_path("~", cwd, home).root_like);
        assert!(classify_path("$HOME/", cwd, home).root_like);
        assert!(classify_path("../../..", cwd, home).root_like);
        assert!(classify_path("/etc/hosts", cwd, home).system);
        assert!(!classify_path("/tmp/build", cwd, home).outside_cwd);
        assert!(classify_path("../other", cwd, home).outside_cwd);
        assert_eq!(classify_path("src/main.rs", cwd, home), PathTraits::default());
        assert_eq!(classify_path("/dev/null", cwd, home), PathTraits::default());
        assert!(classify_path("/dev/sda", cwd, home).block_device);
    }

    #[test]
    fn test_credential_paths() {
        assert!(is_credential_path("~/.ssh/id_rsa"));
        assert!(is_credential_path("/home/dev/.aws/credentials"));
        assert!(is_credential_path(".env"));
        assert!(is_credential_path("server.pem"));
        assert!(!is_credential_path("src/environment.rs"));
        assert!(!is_credential_path("README.md"));
    }

    #[test]
    fn test_git_subcommand_skips_globals() {
        let a = args(&["-C", "repo", "--no-pager", "push", "origin"]);
        let (sub, rest) = git_subcommand(&a).unwrap();
        assert_eq!(sub, "push");
        assert_eq!(rest, &a[4..]);
    }

    #[test]
    fn test_parse_push() {
        let info = parse_push(&args(&["--force", "origin", "main"]));
        assert!(info.force);
        assert_eq!(info.branches, vec!["main"]);

        let info = parse_push(&args(&["origin", "+HEAD:refs/heads/release/1.2"]));
        assert!(info.force);
        assert_eq!(info.branches, vec!["release/1.2"]);

        let info = parse_push(&args(&["origin", ":old-feature"]));
        assert!(info.delete);
        assert!(!info.force);

        let info = parse_push(&args(&["origin"]));
        assert!(info.branches.is_empty());
    }

    #[test]
    fn test_protected_branch_globs() {
        let protected = args(&["main", "release/*"]);
        assert!(is_protected_branch("main", &protected));
        assert!(is_protected_branch("release/2.0", &protected));
        assert!(is_protected_branch("refs/heads/main", &protected));
        assert!(!is_protected_branch("maintenance", &protected));
        assert!(!is_protected_branch("release", &protected));
    }

    #[test]
    fn test_entropy() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
        assert!(shannon_entropy("aGVsbG8gd29ybGQgZXhmaWw9dHJ1ZQ==") > 3.5);
    }

    #[test]
    fn test_fork_bomb() {
        assert!(is_fork_bomb(":(){ :|:& };:"));
        assert!(is_fork_bomb("bomb() { bomb | bomb & }; bomb"));
        assert!(!is_fork_bomb("build() { cargo build; }; build"));
    }
}

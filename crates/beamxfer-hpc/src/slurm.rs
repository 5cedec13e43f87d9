//! Slurm batch script rendering.
//!
//! # Design
//! - Directives are plain data; rendering is deterministic so scripts can be asserted on.
//! - Every value interpolated into a shell command goes through [`shell_quote`].

use std::fmt::Write as _;

/// `#SBATCH` header of a batch script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlurmDirectives {
    /// Quality of service.
    pub qos: String,
    /// Allocation account.
    pub account: String,
    /// Node constraint.
    pub constraint: String,
    /// Wall clock limit (`HH:MM:SS`).
    pub time_limit: String,
    /// Job name shown by the scheduler.
    pub job_name: String,
    /// Standard output path; `%x` and `%j` are expanded by Slurm.
    pub output: String,
    /// Standard error path.
    pub error: String,
    /// Node count.
    pub nodes: Option<u32>,
    /// Tasks per node.
    pub ntasks_per_node: Option<u32>,
    /// CPUs per task.
    pub cpus_per_task: Option<u32>,
    /// Filesystem licenses.
    pub licenses: Option<String>,
    /// Memory request.
    pub mem: Option<String>,
    /// Request exclusive nodes.
    pub exclusive: bool,
}

impl SlurmDirectives {
    /// Render the shebang and directive block.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/bash\n");
        let mut directive = |key: &str, value: &str| {
            let _ = writeln!(out, "#SBATCH --{key}={value}");
        };
        directive("qos", &self.qos);
        directive("account", &self.account);
        directive("constraint", &self.constraint);
        if let Some(nodes) = self.nodes {
            directive("nodes", &nodes.to_string());
        }
        if let Some(tasks) = self.ntasks_per_node {
            directive("ntasks-per-node", &tasks.to_string());
        }
        if let Some(cpus) = self.cpus_per_task {
            directive("cpus-per-task", &cpus.to_string());
        }
        if let Some(licenses) = &self.licenses {
            directive("licenses", licenses);
        }
        if let Some(mem) = &self.mem {
            directive("mem", mem);
        }
        directive("time", &self.time_limit);
        directive("job-name", &self.job_name);
        directive("output", &self.output);
        directive("error", &self.error);
        if self.exclusive {
            out.push_str("#SBATCH --exclusive\n");
        }
        out
    }

    /// Full script: directives, strict shell options, then `body`.
    #[must_use]
    pub fn script(&self, body: &str) -> String {
        let mut out = self.render();
        out.push_str("\nset -euo pipefail\n\n");
        out.push_str(body.trim_end());
        out.push('\n');
        out
    }
}

/// Quote `value` for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '%'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Reduce `value` to characters safe in job names and log file names.
#[must_use]
pub fn sanitize_name(value: &str) -> String {
    let cleaned: String = value
        .trim_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "job".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directives() -> SlurmDirectives {
        SlurmDirectives {
            qos: "preempt".into(),
            account: "als".into(),
            constraint: "cpu".into(),
            time_limit: "00:15:00".into(),
            job_name: "tomo_recon_scan".into(),
            output: "/scratch/logs/%x_%j.out".into(),
            error: "/scratch/logs/%x_%j.err".into(),
            nodes: Some(1),
            ntasks_per_node: Some(1),
            cpus_per_task: Some(64),
            licenses: None,
            mem: None,
            exclusive: true,
        }
    }

    #[test]
    fn directives_render_in_order_with_optional_fields() {
        let rendered = directives().render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "#!/bin/bash");
        assert_eq!(lines[1], "#SBATCH --qos=preempt");
        assert!(lines.contains(&"#SBATCH --cpus-per-task=64"));
        assert!(lines.contains(&"#SBATCH --output=/scratch/logs/%x_%j.out"));
        assert_eq!(lines.last(), Some(&"#SBATCH --exclusive"));
        assert!(!rendered.contains("--licenses"));
    }

    #[test]
    fn script_appends_strict_mode_and_body() {
        let script = directives().script("srun hostname\n\n");
        assert!(script.contains("\nset -euo pipefail\n\nsrun hostname\n"));
        assert!(script.ends_with("srun hostname\n"));
    }

    #[test]
    fn quoting_leaves_plain_paths_alone() {
        assert_eq!(shell_quote("/data/raw/42/scan.h5"), "/data/raw/42/scan.h5");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("/42/mice scan.h5"), "42_mice_scan.h5");
        assert_eq!(sanitize_name("/"), "job");
    }
}

//! Health check for the tools the pipeline depends on.

use serde::Serialize;

use crate::toolchain::{self, ToolchainSource};

/// Result of a single check
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    pub ok: bool,
    /// Missing optional tools degrade the report instead of failing it.
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl CheckResult {
    fn found(path: String, source: Option<ToolchainSource>) -> Self {
        Self {
            ok: true,
            required: true,
            path: Some(path),
            source: source.map(|s| s.to_string()),
            fix: None,
        }
    }

    fn missing(fix: impl Into<String>) -> Self {
        Self {
            ok: false,
            required: true,
            path: None,
            source: None,
            fix: Some(fix.into()),
        }
    }

    fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Serialize, Debug)]
pub struct DoctorReport {
    pub status: String,
    pub checks: CheckResults,
    pub issues_count: usize,
}

#[derive(Serialize, Debug)]
pub struct CheckResults {
    pub cargo: CheckResult,
    pub llvm_profdata: CheckResult,
    pub llvm_cov: CheckResult,
    pub demangler: CheckResult,
}

impl DoctorReport {
    fn from_checks(checks: CheckResults) -> Self {
        let issues_count = checks
            .all()
            .iter()
            .filter(|(_, c)| c.required && !c.ok)
            .count();
        let status = if issues_count == 0 {
            "ok".to_string()
        } else {
            "issues_found".to_string()
        };
        Self {
            status,
            checks,
            issues_count,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.issues_count == 0
    }

    pub fn render_text(&self) -> String {
        let mut out = String::from("Coverage Doctor\n===============\n\n");
        for (name, check) in self.checks.all() {
            out.push_str(&format_check(name, check));
        }
        out.push('\n');
        if self.issues_count == 0 {
            out.push_str("Status: All checks passed\n");
        } else {
            out.push_str(&format!(
                "Status: {} issue{} found\n",
                self.issues_count,
                if self.issues_count == 1 { "" } else { "s" }
            ));
        }
        out
    }
}

impl CheckResults {
    fn all(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("cargo", &self.cargo),
            ("llvm-profdata", &self.llvm_profdata),
            ("llvm-cov", &self.llvm_cov),
            ("demangler", &self.demangler),
        ]
    }
}

fn format_check(name: &str, result: &CheckResult) -> String {
    if result.ok {
        let mut line = format!("  \u{2713} {}: {}", name, result.path.as_deref().unwrap_or("found"));
        if let Some(source) = &result.source {
            line.push_str(&format!(" ({source})"));
        }
        line.push('\n');
        line
    } else {
        let marker = if result.required { "\u{2717}" } else { "!" };
        let mut line = format!("  {marker} {name}: not found\n");
        if let Some(fix) = &result.fix {
            line.push_str(&format!("    \u{2192} {fix}\n"));
        }
        line
    }
}

/// Probe every tool without failing early.
pub fn run_checks(demangler: &str) -> DoctorReport {
    let cargo = match toolchain::find_cargo() {
        Ok(path) => CheckResult::found(path.display().to_string(), None),
        Err(_) => CheckResult::missing("Install Rust via https://rustup.rs"),
    };

    let (llvm_profdata, llvm_cov) = match toolchain::detect_llvm_toolchain() {
        Ok(llvm) => (
            CheckResult::found(llvm.profdata.display().to_string(), Some(llvm.source)),
            CheckResult::found(llvm.cov.display().to_string(), Some(llvm.source)),
        ),
        Err(err) => {
            let fix = err.to_string();
            (CheckResult::missing(fix.clone()), CheckResult::missing(fix))
        }
    };

    let demangler = match which::which(demangler) {
        Ok(path) => CheckResult::found(path.display().to_string(), None).optional(),
        Err(_) => CheckResult::missing(format!("cargo install {demangler}")).optional(),
    };

    DoctorReport::from_checks(CheckResults {
        cargo,
        llvm_profdata,
        llvm_cov,
        demangler,
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn ok(path: &str) -> CheckResult {
        CheckResult::found(path.to_string(), None)
    }

    #[test]
    fn check_result__json_found__then_fix_skipped() {
        let result = CheckResult::found(
            "/usr/bin/llvm-cov".to_string(),
            Some(ToolchainSource::System),
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"ok\":true"));
        assert!(json.contains("\"path\":\"/usr/bin/llvm-cov\""));
        assert!(json.contains("\"source\":\"System LLVM\""));
        assert!(!json.contains("\"fix\""));
    }

    #[test]
    fn check_result__json_missing__then_path_skipped() {
        let result = CheckResult::missing("cargo install rustfilt");
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(json.contains("\"fix\":\"cargo install rustfilt\""));
        assert!(!json.contains("\"path\""));
    }

    #[test]
    fn doctor_report__missing_optional_demangler__then_healthy() {
        let report = DoctorReport::from_checks(CheckResults {
            cargo: ok("/bin/cargo"),
            llvm_profdata: ok("/llvm/llvm-profdata"),
            llvm_cov: ok("/llvm/llvm-cov"),
            demangler: CheckResult::missing("cargo install rustfilt").optional(),
        });

        assert!(report.is_healthy());
        assert_eq!(report.status, "ok");
        let text = report.render_text();
        assert!(text.contains("! demangler: not found"));
        assert!(text.contains("cargo install rustfilt"));
        assert!(text.contains("All checks passed"));
    }

    #[test]
    fn doctor_report__missing_llvm_tools__then_two_issues() {
        let report = DoctorReport::from_checks(CheckResults {
            cargo: ok("/bin/cargo"),
            llvm_profdata: CheckResult::missing("rustup component add llvm-tools-preview"),
            llvm_cov: CheckResult::missing("rustup component add llvm-tools-preview"),
            demangler: ok("/bin/rustfilt").optional(),
        });

        assert!(!report.is_healthy());
        assert_eq!(report.issues_count, 2);
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("\"status\": \"issues_found\""));
        assert!(json.contains("\"issues_count\": 2"));
        assert!(report.render_text().contains("Status: 2 issues found"));
    }
}

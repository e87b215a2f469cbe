//! Module listing command

use super::registry_helper::builtin_registry;
use mtriage_core::{ModuleKind, ModuleManifest, Registry};
use std::fmt::Write as _;

fn render_manifest(out: &mut String, kind: ModuleKind, manifest: &ModuleManifest) {
    let _ = writeln!(out, "\n{} ({kind})", manifest.name);
    let _ = writeln!(out, "  Description: {}", manifest.description);
    if manifest.args.is_empty() {
        let _ = writeln!(out, "  Args: none");
        return;
    }
    let _ = writeln!(out, "  Args:");
    for arg in &manifest.args {
        let flag = if arg.required { "required" } else { "optional" };
        let _ = writeln!(out, "    {} ({flag}): {}", arg.name, arg.description);
    }
}

/// Human-readable listing of every module in `registry`
pub fn render_modules(registry: &Registry) -> String {
    let mut out = String::from("Available modules:\n");
    let kinds = [
        (ModuleKind::Selector, registry.selector_names()),
        (ModuleKind::Analyser, registry.analyser_names()),
    ];
    for (kind, names) in kinds {
        for name in names {
            if let Some(manifest) = registry.manifest(kind, &name) {
                render_manifest(&mut out, kind, manifest);
            }
        }
    }
    out
}

pub fn list_modules() -> anyhow::Result<()> {
    print!("{}", render_modules(&builtin_registry()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_shows_required_args() {
        let listing = render_modules(&builtin_registry());
        assert!(listing.starts_with("Available modules:"));
        assert!(listing.contains("Local (selector)"));
        assert!(listing.contains("source (required)"));
        assert!(listing.contains("threshold (optional)"));
        assert!(listing.contains("Flatten (analyser)"));
    }
}

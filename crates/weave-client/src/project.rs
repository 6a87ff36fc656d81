//! Weave project resolution from the environment.

/// Resolve the Weave project from env vars.
///
/// Supported formats:
/// - `WEAVE_PROJECT=entity/project` or `WEAVE_PROJECT=project`
/// - `WEAVE_PROJECT_ID=project` + optional `WEAVE_ENTITY=entity`
/// - `WANDB_PROJECT_ID=project` (legacy)
pub fn resolve_project() -> Option<String> {
    resolve_project_from(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
}

fn resolve_project_from(get: impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Some(project) = get("WEAVE_PROJECT") {
        return Some(project);
    }

    if let Some(project_id) = get("WEAVE_PROJECT_ID") {
        return Some(match get("WEAVE_ENTITY") {
            Some(entity) => format!("{entity}/{project_id}"),
            None => project_id,
        });
    }

    get("WANDB_PROJECT_ID")
}

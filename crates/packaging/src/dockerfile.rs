use svcboot_models::{Recipe, Step};

/// Renders a recipe as a Dockerfile, one instruction per step, preserving
/// pipeline order exactly.
pub fn render(recipe: &Recipe) -> String {
    let mut out = String::new();
    for step in recipe.steps() {
        out.push_str(&instruction_for(step));
        out.push('\n');
    }
    out
}

fn instruction_for(step: &Step) -> String {
    match step {
        Step::FromBase { image } => format!("FROM {image}"),
        Step::InstallOsPackages { packages } => format!(
            "RUN apt-get update && apt-get install -y {}",
            packages.join(" ")
        ),
        Step::SetWorkdir { path } => format!("WORKDIR {path}"),
        Step::CopySourceTree => "COPY . .".to_string(),
        Step::UpgradeInstaller => "RUN pip install --upgrade pip".to_string(),
        // Shell short-circuit gives the two-phase policy: the legacy
        // resolver runs only when the default resolver exits non-zero.
        Step::InstallDependencies => {
            "RUN pip install --no-cache-dir . || \
             pip install --no-cache-dir . --use-deprecated=legacy-resolver"
                .to_string()
        }
        Step::RebuildFontCache => "RUN fc-cache -f -v".to_string(),
        // `|| true` keeps an unexpanded glob (no bin/, or no *.sh in it)
        // from failing the build.
        Step::MarkScriptsExecutable { dir, pattern } => {
            format!("RUN chmod +x {dir}/{pattern} || true")
        }
        Step::CreateLogsDir { path } => format!("RUN mkdir -p {path}"),
        Step::SetEnv { key, value } => format!("ENV {key}={value}"),
        Step::ExposePort { port } => format!("EXPOSE {port}"),
        Step::Launch {
            entry_point,
            bind,
            port,
        } => format!(
            "CMD [\"uvicorn\", \"{entry_point}\", \"--host\", \"{bind}\", \"--port\", \"{port}\"]"
        ),
    }
}

use std::process::ExitCode;

pub type CliResult<T> = anyhow::Result<T>;

/// Report a glue error (config, working directory) and exit with 1
///
/// Supervised runs never get here; they exit with the child's outcome.
pub fn to_exit_code(result: CliResult<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render(&e));
            ExitCode::FAILURE
        }
    }
}

/// `error: <top>` with each cause on its own indented line
fn render(error: &anyhow::Error) -> String {
    let mut rendered = format!("error: {error}");
    for cause in error.chain().skip(1) {
        rendered.push_str(&format!("\n  caused by: {cause}"));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_render_includes_causes() {
        let error = std::fs::read_to_string("/nonexistent/muzzle.toml")
            .context("failed to read config file: /nonexistent/muzzle.toml")
            .unwrap_err();

        let rendered = render(&error);
        assert!(rendered.starts_with("error: failed to read config file"));
        assert!(rendered.contains("\n  caused by: "));
    }
}

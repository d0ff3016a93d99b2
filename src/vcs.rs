/// Build version in the form `<commit timestamp>-<sha>`, suffixed with
/// `-dirty` when the working tree had uncommitted changes at build time.
pub fn version() -> String {
	format_version(
		option_env!("VERGEN_GIT_COMMIT_TIMESTAMP").unwrap_or_default(),
		option_env!("VERGEN_GIT_SHA").unwrap_or_default(),
		option_env!("VERGEN_GIT_DIRTY") == Some("true"),
	)
}

fn format_version(timestamp: &str, revision: &str, modified: bool) -> String {
	if modified {
		format!("{timestamp}-{revision}-dirty")
	} else {
		format!("{timestamp}-{revision}")
	}
}

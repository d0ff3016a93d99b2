use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
	// Falls back to placeholder values (with a cargo warning) outside a git checkout.
	EmitBuilder::builder()
		.build_timestamp()
		.git_sha(true)
		.git_commit_timestamp()
		.git_dirty(false)
		.emit()?;
	Ok(())
}

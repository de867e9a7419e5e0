fn main() -> anyhow::Result<()> {
    taskmesh::run()?;
    Ok(())
}

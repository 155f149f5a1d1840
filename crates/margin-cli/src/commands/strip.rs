//! Remove annotations from every library document

use anyhow::Result;

use super::Session;
use crate::output::Output;
use crate::prompt;

pub fn strip(session: &Session, yes: bool, output: &Output) -> Result<()> {
    if !yes {
        if !output.should_prompt() {
            anyhow::bail!("Refusing to remove annotations without --yes");
        }
        let library = session.config.library_path();
        let question = format!(
            "Remove all merged annotations from {}?",
            library.display()
        );
        if !prompt::confirm(&question)? {
            output.message("Nothing removed.");
            return Ok(());
        }
    }

    let changed = session.reconciler().strip_all()?;
    if output.is_quiet() {
        println!("{}", changed);
    } else {
        output.success(&format!("Removed annotations from {} book(s)", changed));
    }
    Ok(())
}

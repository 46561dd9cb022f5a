//! `rago skills`: Loaded skill documents.

use rago_config::AppConfig;
use rago_tools::SkillLoader;

pub fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let loader = SkillLoader::new(config.skills.dirs.clone());
    let skills = loader.load_all();

    if skills.is_empty() {
        println!("No skills found in:");
        for dir in loader.dirs() {
            println!("  {}", dir.display());
        }
        return Ok(());
    }

    for skill in &skills {
        let state = if skill.enabled() { "" } else { " (not offered to the model)" };
        println!("  {}{state}", skill.summary());
        for variable in &skill.variables {
            let required = if variable.required { "required" } else { "optional" };
            println!("      {{{{{}}}}} {required}", variable.name);
        }
    }
    Ok(())
}

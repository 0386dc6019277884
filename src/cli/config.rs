use crate::config::generate::generate_starter_config;
use crate::config::{default_user_config_path, load_config, resolve_config_path};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = default_user_config_path()
        .filter(|path| match path.parent() {
            Some(parent) => match fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(_) => {
                    eprintln!("Warning: Could not create directory {}", parent.display());
                    eprintln!("Falling back to /etc/logstream/config.yml");
                    false
                }
            },
            None => false,
        })
        .unwrap_or_else(|| PathBuf::from("/etc/logstream/config.yml"));

    write_config(&config_path, &config_content)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

fn write_config(path: &Path, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "Config file already exists at {}. Remove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn validate(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let path = resolve_config_path(config_path).ok_or(
        "No config file found. Run 'logstream config init' or pass --config",
    )?;

    let config = load_config(&path)?;
    println!("Config file {} is valid", path.display());
    println!("  mode:    {:?}", config.mode);
    println!("  listen:  {}", config.web.listen);
    println!(
        "  storage: {:?} at {}",
        config.storage.backend,
        config.storage.path.display()
    );
    println!("  tail:    {:?}", config.tail.mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_config_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.yml");

        write_config(&path, "mode: unified\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "mode: unified\n");
        assert!(write_config(&path, "mode: buffered\n").is_err());
    }

    #[test]
    fn test_validate_reports_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "writer:\n  batch_size: 0\n").unwrap();

        assert!(validate(Some(&path)).is_err());
    }
}

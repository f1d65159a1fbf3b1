//! Closed language table (§4.7). Unknown languages are rejected up front.

/// Map a client-facing language name to `name@version` understood by the
/// sandbox.
pub fn runtime_for(language: &str) -> Option<&'static str> {
    Some(match language {
        "javascript" => "javascript@18.15.0",
        "python" => "python@3.10.0",
        "java" => "java@15.0.2",
        "cpp" => "cpp@10.2.0",
        "c" => "c@10.2.0",
        "typescript" => "typescript@5.0.3",
        "php" => "php@8.2.3",
        "ruby" => "ruby@3.0.1",
        "go" => "go@1.16.2",
        "rust" => "rust@1.68.2",
        "kotlin" => "kotlin@1.8.20",
        "swift" => "swift@5.3.3",
        "csharp" => "csharp@6.12.0",
        _ => return None,
    })
}

/// Fixed filename per language; `main.txt` for anything not in the table
/// (reachable only if a caller bypasses [`runtime_for`]'s rejection).
pub fn filename_for(language: &str) -> &'static str {
    match language {
        "javascript" => "main.js",
        "python" => "main.py",
        "java" => "Main.java",
        "cpp" => "main.cpp",
        "c" => "main.c",
        "typescript" => "main.ts",
        "php" => "main.php",
        "ruby" => "main.rb",
        "go" => "main.go",
        "rust" => "main.rs",
        "kotlin" => "Main.kt",
        "swift" => "main.swift",
        "csharp" => "Main.cs",
        _ => "main.txt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tabled_language_has_a_filename() {
        for lang in [
            "javascript", "python", "java", "cpp", "c", "typescript", "php", "ruby", "go", "rust",
            "kotlin", "swift", "csharp",
        ] {
            assert!(runtime_for(lang).is_some());
            assert_ne!(filename_for(lang), "main.txt");
        }
    }

    #[test]
    fn unknown_language_has_no_runtime() {
        assert!(runtime_for("cobol").is_none());
        assert_eq!(filename_for("cobol"), "main.txt");
    }
}

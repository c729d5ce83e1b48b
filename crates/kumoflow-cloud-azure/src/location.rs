//! Location normalization

/// Normalize a location for comparison and wire use: lowercase with spaces
/// removed, so "West Europe" and "westeurope" address the same region.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("West Europe"), "westeurope");
        assert_eq!(normalize("japaneast"), "japaneast");
        assert_eq!(normalize("East US 2"), "eastus2");
    }
}

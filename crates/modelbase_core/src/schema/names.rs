use once_cell::sync::Lazy;
use regex::Regex;

static MODEL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.+\-]*$").expect("valid model name regex"));
static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid field name regex"));

pub(crate) fn is_valid_model_name(name: &str) -> bool {
    MODEL_NAME_RE.is_match(name)
}

pub(crate) fn is_valid_field_name(name: &str) -> bool {
    FIELD_NAME_RE.is_match(name)
}

/// Main table of a model: `m_` plus the name with `.`, `+` and `-` mapped to `_`.
pub fn table_name_for(model: &str) -> String {
    format!("m_{}", model.replace(['.', '+', '-'], "_"))
}

/// Side table holding the ordered elements of one sequence field.
pub(crate) fn sequence_table_for(table: &str, field: &str) -> String {
    format!("s_{}__{}", table.trim_start_matches("m_"), field)
}

/// Column holding a field's scalar value or sequence element count.
pub(crate) fn column_for(field: &str) -> String {
    format!("f_{field}")
}

#[cfg(test)]
mod tests {
    use super::{
        column_for, is_valid_field_name, is_valid_model_name, sequence_table_for, table_name_for,
    };

    #[test]
    fn model_names_allow_dotted_and_dashed_forms() {
        assert!(is_valid_model_name("zip.unzipped-file+v2"));
        assert!(is_valid_model_name("Data"));
        assert!(!is_valid_model_name("1data"));
        assert!(!is_valid_model_name("bad name"));
        assert!(!is_valid_model_name("quote\"d"));
        assert!(!is_valid_model_name(""));
    }

    #[test]
    fn field_names_are_identifiers() {
        assert!(is_valid_field_name("_hidden"));
        assert!(is_valid_field_name("size2"));
        assert!(!is_valid_field_name("2size"));
        assert!(!is_valid_field_name("a.b"));
    }

    #[test]
    fn names_sanitize_into_tables_and_columns() {
        assert_eq!(table_name_for("zip.unzipped-file+v2"), "m_zip_unzipped_file_v2");
        assert_eq!(table_name_for("zip_unzipped_file_v2"), "m_zip_unzipped_file_v2");
        assert_eq!(sequence_table_for("m_file", "tags"), "s_file__tags");
        assert_eq!(column_for("size"), "f_size");
    }
}

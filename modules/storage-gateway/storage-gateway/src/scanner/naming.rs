//! Case folder naming: `CASEID_Name_Parts[_email@domain.tld]`.

/// A case folder name split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFolderName {
    /// Alphanumeric case identifier.
    pub case_id: String,
    /// Name parts joined with spaces; `None` if only an e-mail follows the id.
    pub client_name: Option<String>,
    pub client_email: Option<String>,
}

/// Parse a folder name, `None` if it does not follow the case convention.
#[must_use]
pub fn parse_case_folder(folder_name: &str) -> Option<CaseFolderName> {
    let parts: Vec<&str> = folder_name.split('_').collect();
    let (case_id, rest) = parts.split_first()?;
    if rest.is_empty() || case_id.is_empty() || !case_id.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }

    let (name_parts, client_email) = match rest.split_last() {
        Some((last, head)) if last.contains('@') && last.contains('.') => {
            (head, Some((*last).to_owned()))
        }
        _ => (rest, None),
    };

    let client_name = name_parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Some(CaseFolderName {
        case_id: (*case_id).to_owned(),
        client_name: (!client_name.is_empty()).then_some(client_name),
        client_email,
    })
}

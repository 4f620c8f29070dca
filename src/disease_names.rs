use crate::registry::DiseaseLink;

/// Disease names are expected to start with the current gene symbol
/// followed by a hyphen or a space.
pub fn names_current_symbol(link: &DiseaseLink) -> bool {
    let name = link.disease_name.as_str();
    name.strip_prefix(link.gene_symbol.as_str())
        .is_some_and(|rest| rest.starts_with('-') || rest.starts_with(' '))
}

pub fn stale_disease_names(links: &[DiseaseLink]) -> Vec<&DiseaseLink> {
    links
        .iter()
        .filter(|link| !names_current_symbol(link))
        .collect()
}

pub fn describe(link: &DiseaseLink) -> String {
    format!(
        "disease to update: {}; gene '{}'; disease '{}'",
        link.record_id, link.gene_symbol, link.disease_name
    )
}

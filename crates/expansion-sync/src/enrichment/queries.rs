use expansion_core::{QueryCategory, SearchQuery};

const EXEC_HIRE_TEMPLATES: [&str; 4] = [
    "{} appointed VP of Learning",
    "{} hired Head of Enablement",
    "{} Chief Learning Officer",
    "{} new VP Enablement",
];

const EXEC_DEPARTURE_TEMPLATES: [&str; 3] = [
    "{} VP of Learning left",
    "{} Head of Enablement resigned",
    "{} executive departure learning",
];

const LAYOFF_TEMPLATES: [&str; 4] = [
    "{} layoffs",
    "{} workforce reduction",
    "{} job cuts",
    "{} restructuring",
];

const HEADCOUNT_GROWTH_TEMPLATES: [&str; 3] = [
    "{} hiring expansion",
    "{} plans to hire",
    "{} expanding workforce",
];

/// The name the query templates are filled with.
pub fn query_label<'a>(domain: &'a str, account_name: &'a str) -> &'a str {
    let name = account_name.trim();
    if !name.is_empty() {
        name
    } else if !domain.is_empty() {
        domain
    } else {
        "company"
    }
}

/// Fixed set of 14 queries, grouped by category in a stable order.
pub fn build_search_queries(domain: &str, account_name: &str) -> Vec<SearchQuery> {
    let label = query_label(domain, account_name);
    let groups: [(QueryCategory, &[&str]); 4] = [
        (QueryCategory::ExecHire, &EXEC_HIRE_TEMPLATES),
        (QueryCategory::ExecDeparture, &EXEC_DEPARTURE_TEMPLATES),
        (QueryCategory::Layoff, &LAYOFF_TEMPLATES),
        (QueryCategory::HeadcountGrowth, &HEADCOUNT_GROWTH_TEMPLATES),
    ];

    groups
        .iter()
        .flat_map(|(category, templates)| {
            templates.iter().map(move |template| SearchQuery {
                query: template.replacen("{}", label, 1),
                category: *category,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fourteen_queries_per_category_split() {
        let queries = build_search_queries("acme.com", "Acme");
        assert_eq!(queries.len(), 14);

        let count = |c: QueryCategory| queries.iter().filter(|q| q.category == c).count();
        assert_eq!(count(QueryCategory::ExecHire), 4);
        assert_eq!(count(QueryCategory::ExecDeparture), 3);
        assert_eq!(count(QueryCategory::Layoff), 4);
        assert_eq!(count(QueryCategory::HeadcountGrowth), 3);

        assert_eq!(queries[0].query, "Acme appointed VP of Learning");
        assert_eq!(queries[7].query, "Acme layoffs");
        assert_eq!(queries[13].query, "Acme expanding workforce");
        assert_eq!(queries, build_search_queries("acme.com", "Acme"));
    }

    #[test]
    fn label_falls_back_to_domain_then_company() {
        assert_eq!(build_search_queries("acme.com", "  ")[0].query, "acme.com appointed VP of Learning");
        assert_eq!(build_search_queries("", "")[7].query, "company layoffs");
    }
}

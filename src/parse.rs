//! E-utilities XML response parsing.
//!
//! Covers esearch id lists, efetch PubMed articles, elink PMC lookups and
//! PMC article bodies (full text and reference lists).

use crate::error::{HarvestError, Result};
use crate::types::ResolvedRecord;
use quick_xml::events::Event;
use quick_xml::Reader;

/// A parse event with the current element path (outermost first).
enum Node<'a> {
    Start {
        name: &'a str,
        attrs: &'a [(String, String)],
    },
    Text(&'a str),
    End(&'a str),
}

/// Walk `xml`, calling `visit` with the element path for every start tag,
/// text run and end tag. Empty elements produce a start and an end.
fn walk<F>(xml: &str, mut visit: F) -> Result<()>
where
    F: FnMut(&[String], Node<'_>),
{
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let attrs = collect_attrs(&e);
                path.push(name.clone());
                visit(&path, Node::Start { name: &name, attrs: &attrs });
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let attrs = collect_attrs(&e);
                path.push(name.clone());
                visit(&path, Node::Start { name: &name, attrs: &attrs });
                visit(&path, Node::End(&name));
                path.pop();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&e).into_owned());
                visit(&path, Node::Text(&text));
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                visit(&path, Node::Text(&text));
            }
            Ok(Event::End(_)) => {
                if let Some(name) = path.last().cloned() {
                    visit(&path, Node::End(&name));
                    path.pop();
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(HarvestError::Parse(format!(
                    "Invalid XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    Ok(())
}

fn collect_attrs(e: &quick_xml::events::BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
            let value = a
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_default();
            (key, value)
        })
        .collect()
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

fn within(path: &[String], name: &str) -> bool {
    path.iter().any(|p| p == name)
}

fn push_text(buf: &mut String, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if !buf.is_empty() {
        buf.push(' ');
    }
    buf.push_str(text);
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First run of four digits, e.g. the year in a MedlineDate like "2020 Jan-Feb".
fn first_year(s: &str) -> Option<u16> {
    let bytes = s.as_bytes();
    bytes
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .and_then(|i| s[i..i + 4].parse().ok())
}

/// Parse an esearch response into PMIDs, in relevance order.
pub fn parse_esearch_ids(xml: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut error: Option<String> = None;

    walk(xml, |path, node| {
        if let Node::Text(text) = node {
            if ends_with(path, &["IdList", "Id"]) {
                ids.push(text.trim().to_string());
            } else if ends_with(path, &["eSearchResult", "ERROR"]) {
                error = Some(text.trim().to_string());
            }
        }
    })?;

    match error {
        Some(msg) if ids.is_empty() => Err(HarvestError::Parse(format!("esearch error: {}", msg))),
        _ => Ok(ids),
    }
}

/// Parse the first `PubmedArticle` of an efetch response.
///
/// Returns `None` when the response holds no article or the article has no title.
pub fn parse_efetch_article(xml: &str) -> Result<Option<ResolvedRecord>> {
    let mut seen_article = false;
    let mut done = false;
    let mut pmid: Option<String> = None;
    let mut title = String::new();
    let mut authors: Vec<String> = Vec::new();
    let mut last_name = String::new();
    let mut fore_name = String::new();
    let mut journal_title: Option<String> = None;
    let mut journal_abbrev: Option<String> = None;
    let mut year: Option<u16> = None;
    let mut medline_year: Option<u16> = None;
    let mut doi: Option<String> = None;
    let mut article_id_doi: Option<String> = None;
    let mut in_doi = false;
    let mut in_article_id_doi = false;
    let mut abstract_text = String::new();

    walk(xml, |path, node| {
        if done {
            return;
        }
        match node {
            Node::Start { name, attrs } => match name {
                "PubmedArticle" => seen_article = true,
                "Author" if ends_with(path, &["AuthorList", "Author"]) => {
                    last_name.clear();
                    fore_name.clear();
                }
                "ELocationID" => {
                    in_doi = attr(attrs, "EIdType").is_some_and(|t| t.eq_ignore_ascii_case("doi"));
                }
                "ArticleId" => {
                    in_article_id_doi =
                        attr(attrs, "IdType").is_some_and(|t| t.eq_ignore_ascii_case("doi"));
                }
                _ => {}
            },
            Node::Text(text) if within(path, "PubmedArticle") => {
                if ends_with(path, &["MedlineCitation", "PMID"]) && pmid.is_none() {
                    pmid = Some(text.trim().to_string());
                } else if within(path, "ArticleTitle") {
                    push_text(&mut title, text);
                } else if ends_with(path, &["AuthorList", "Author", "LastName"])
                    || ends_with(path, &["AuthorList", "Author", "CollectiveName"])
                {
                    push_text(&mut last_name, text);
                } else if ends_with(path, &["AuthorList", "Author", "ForeName"]) {
                    push_text(&mut fore_name, text);
                } else if ends_with(path, &["Journal", "Title"]) && journal_title.is_none() {
                    journal_title = Some(text.trim().to_string());
                } else if ends_with(path, &["Journal", "ISOAbbreviation"]) && journal_abbrev.is_none() {
                    journal_abbrev = Some(text.trim().to_string());
                } else if ends_with(path, &["PubDate", "Year"]) && year.is_none() {
                    year = text.trim().parse().ok();
                } else if ends_with(path, &["PubDate", "MedlineDate"]) && medline_year.is_none() {
                    medline_year = first_year(text);
                } else if path.last().is_some_and(|p| p == "ELocationID") && in_doi && doi.is_none() {
                    doi = Some(text.trim().to_string());
                } else if path.last().is_some_and(|p| p == "ArticleId")
                    && in_article_id_doi
                    && article_id_doi.is_none()
                {
                    article_id_doi = Some(text.trim().to_string());
                } else if within(path, "Abstract") && within(path, "AbstractText") {
                    push_text(&mut abstract_text, text);
                }
            }
            Node::Text(_) => {}
            Node::End(name) => match name {
                "Author" if ends_with(path, &["AuthorList", "Author"]) => {
                    if !last_name.is_empty() {
                        let full = if fore_name.is_empty() {
                            last_name.clone()
                        } else {
                            format!("{} {}", fore_name, last_name)
                        };
                        authors.push(full);
                    }
                }
                "ELocationID" => in_doi = false,
                "ArticleId" => in_article_id_doi = false,
                "PubmedArticle" => done = true,
                _ => {}
            },
        }
    })?;

    if !seen_article {
        return Ok(None);
    }
    let (Some(id), false) = (pmid, title.is_empty()) else {
        return Ok(None);
    };

    Ok(Some(ResolvedRecord {
        id,
        title: collapse_whitespace(&title),
        authors,
        journal: journal_title.or(journal_abbrev),
        year: year.or(medline_year),
        doi: doi.or(article_id_doi),
        abstract_text: (!abstract_text.is_empty()).then_some(abstract_text),
    }))
}

/// Parse an elink (pubmed → pmc) response into the linked PMC id, if any.
pub fn parse_elink_pmc_id(xml: &str) -> Result<Option<String>> {
    // (link name, db to, first id) per LinkSetDb
    let mut link_sets: Vec<(String, String, Option<String>)> = Vec::new();

    walk(xml, |path, node| match node {
        Node::Start { name: "LinkSetDb", .. } => {
            link_sets.push((String::new(), String::new(), None));
        }
        Node::Text(text) => {
            let Some(current) = link_sets.last_mut() else {
                return;
            };
            if ends_with(path, &["LinkSetDb", "DbTo"]) {
                current.1 = text.trim().to_string();
            } else if ends_with(path, &["LinkSetDb", "LinkName"]) {
                current.0 = text.trim().to_string();
            } else if ends_with(path, &["LinkSetDb", "Link", "Id"]) && current.2.is_none() {
                current.2 = Some(text.trim().to_string());
            }
        }
        _ => {}
    })?;

    let pmc_sets = || link_sets.iter().filter(|(_, db, id)| db == "pmc" && id.is_some());
    Ok(pmc_sets()
        .find(|(name, _, _)| name == "pubmed_pmc")
        .or_else(|| pmc_sets().next())
        .and_then(|(_, _, id)| id.clone()))
}

/// Minimum length for extracted full text to count as an article body.
pub const MIN_FULLTEXT_LEN: usize = 100;

/// Render a PMC article as plain text with `TITLE:`, `ABSTRACT:` and one block per
/// top-level body section. Returns `None` when the result is too short to be a body.
pub fn parse_pmc_fulltext(xml: &str) -> Result<Option<String>> {
    let mut title = String::new();
    let mut abstract_text = String::new();
    let mut sections: Vec<(Option<String>, String)> = Vec::new();

    walk(xml, |path, node| match node {
        Node::Start { name: "sec", .. } if ends_with(path, &["body", "sec"]) => {
            sections.push((None, String::new()));
        }
        Node::Text(text) => {
            if ends_with(path, &["title-group", "article-title"]) && within(path, "article-meta") {
                push_text(&mut title, text);
            } else if within(path, "abstract") && !within(path, "body") {
                push_text(&mut abstract_text, text);
            } else if within(path, "body") {
                if ends_with(path, &["body", "sec", "title"]) {
                    if let Some(section) = sections.last_mut() {
                        if section.0.is_none() {
                            section.0 = Some(text.trim().to_string());
                            return;
                        }
                    }
                }
                if sections.is_empty() {
                    sections.push((Some("BODY".to_string()), String::new()));
                }
                if let Some(section) = sections.last_mut() {
                    push_text(&mut section.1, text);
                }
            }
        }
        _ => {}
    })?;

    let mut parts = Vec::new();
    if !title.is_empty() {
        parts.push(format!("TITLE: {}", collapse_whitespace(&title)));
    }
    if !abstract_text.is_empty() {
        parts.push(format!("ABSTRACT: {}", collapse_whitespace(&abstract_text)));
    }
    for (heading, text) in sections {
        if text.is_empty() {
            continue;
        }
        let heading = heading.unwrap_or_else(|| "SECTION".to_string());
        parts.push(format!("{}: {}", heading.to_uppercase(), collapse_whitespace(&text)));
    }

    let full_text = parts.join("\n\n");
    if full_text.trim().len() < MIN_FULLTEXT_LEN {
        return Ok(None);
    }
    Ok(Some(full_text))
}

/// Extract the reference list of a PMC article, one rendered reference per entry.
pub fn parse_pmc_references(xml: &str) -> Result<Vec<String>> {
    let mut refs = Vec::new();
    let mut current: Option<String> = None;

    walk(xml, |path, node| match node {
        Node::Start { name: "ref", .. } if within(path, "ref-list") => {
            current = Some(String::new());
        }
        Node::Text(text) => {
            if let Some(buf) = current.as_mut() {
                push_text(buf, text);
            }
        }
        Node::End("ref") => {
            if let Some(buf) = current.take() {
                let rendered = collapse_whitespace(&buf);
                if !rendered.is_empty() {
                    refs.push(rendered);
                }
            }
        }
        _ => {}
    })?;

    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESEARCH: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<!DOCTYPE eSearchResult PUBLIC "-//NLM//DTD esearch 20060628//EN" "https://eutils.ncbi.nlm.nih.gov/eutils/dtd/20060628/esearch.dtd">
<eSearchResult><Count>2</Count><RetMax>2</RetMax><RetStart>0</RetStart>
<IdList>
<Id>33301246</Id>
<Id>32511536</Id>
</IdList>
<TranslationSet/><QueryTranslation>long covid[Title]</QueryTranslation>
</eSearchResult>"#;

    const EFETCH: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">33301246</PMID>
    <Article PubModel="Print-Electronic">
      <Journal>
        <JournalIssue CitedMedium="Internet">
          <PubDate><Year>2021</Year><Month>Jan</Month></PubDate>
        </JournalIssue>
        <Title>The New England journal of medicine</Title>
        <ISOAbbreviation>N Engl J Med</ISOAbbreviation>
      </Journal>
      <ArticleTitle>Risk of <i>long</i> COVID &amp; outcomes.</ArticleTitle>
      <ELocationID EIdType="pii" ValidYN="Y">NEJMoa2034577</ELocationID>
      <ELocationID EIdType="doi" ValidYN="Y">10.1056/NEJMoa2034577</ELocationID>
      <Abstract>
        <AbstractText Label="BACKGROUND">First part.</AbstractText>
        <AbstractText Label="METHODS">Second part.</AbstractText>
      </Abstract>
      <AuthorList CompleteYN="Y">
        <Author ValidYN="Y"><LastName>Polack</LastName><ForeName>Fernando P</ForeName><Initials>FP</Initials></Author>
        <Author ValidYN="Y"><LastName>Thomas</LastName><ForeName>Stephen J</ForeName></Author>
        <Author ValidYN="Y"><CollectiveName>C4591001 Clinical Trial Group</CollectiveName></Author>
      </AuthorList>
    </Article>
    <CommentsCorrectionsList>
      <CommentsCorrections RefType="CommentIn"><RefSource>N Engl J Med.</RefSource><PMID Version="1">99999999</PMID></CommentsCorrections>
    </CommentsCorrectionsList>
  </MedlineCitation>
</PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_esearch_ids() {
        let ids = parse_esearch_ids(ESEARCH).unwrap();
        assert_eq!(ids, vec!["33301246", "32511536"]);
    }

    #[test]
    fn test_parse_esearch_empty() {
        let xml = "<eSearchResult><Count>0</Count><IdList/></eSearchResult>";
        assert!(parse_esearch_ids(xml).unwrap().is_empty());
    }

    #[test]
    fn test_parse_esearch_error() {
        let xml = "<eSearchResult><ERROR>Invalid query</ERROR></eSearchResult>";
        assert!(matches!(parse_esearch_ids(xml), Err(HarvestError::Parse(_))));
    }

    #[test]
    fn test_parse_efetch_article() {
        let record = parse_efetch_article(EFETCH).unwrap().unwrap();
        assert_eq!(record.id, "33301246");
        assert_eq!(record.title, "Risk of long COVID & outcomes.");
        assert_eq!(
            record.authors,
            vec![
                "Fernando P Polack",
                "Stephen J Thomas",
                "C4591001 Clinical Trial Group"
            ]
        );
        assert_eq!(
            record.journal.as_deref(),
            Some("The New England journal of medicine")
        );
        assert_eq!(record.year, Some(2021));
        assert_eq!(record.doi.as_deref(), Some("10.1056/NEJMoa2034577"));
        assert_eq!(record.abstract_text.as_deref(), Some("First part. Second part."));
    }

    #[test]
    fn test_parse_efetch_medline_date_and_abbrev() {
        let xml = r#"<PubmedArticleSet><PubmedArticle><MedlineCitation>
            <PMID>1</PMID>
            <Article>
              <Journal>
                <JournalIssue><PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate></JournalIssue>
                <ISOAbbreviation>J Test</ISOAbbreviation>
              </Journal>
              <ArticleTitle>A title</ArticleTitle>
            </Article>
          </MedlineCitation></PubmedArticle></PubmedArticleSet>"#;
        let record = parse_efetch_article(xml).unwrap().unwrap();
        assert_eq!(record.year, Some(1998));
        assert_eq!(record.journal.as_deref(), Some("J Test"));
        assert!(record.doi.is_none());
    }

    #[test]
    fn test_parse_efetch_no_article() {
        let xml = "<PubmedArticleSet></PubmedArticleSet>";
        assert!(parse_efetch_article(xml).unwrap().is_none());
    }

    #[test]
    fn test_parse_efetch_invalid_xml() {
        assert!(parse_efetch_article("<PubmedArticleSet><a></b>").is_err());
    }

    #[test]
    fn test_parse_elink_prefers_pubmed_pmc() {
        let xml = r#"<eLinkResult><LinkSet>
            <DbFrom>pubmed</DbFrom>
            <IdList><Id>33301246</Id></IdList>
            <LinkSetDb><DbTo>pmc</DbTo><LinkName>pubmed_pmc_refs</LinkName>
              <Link><Id>111</Id></Link></LinkSetDb>
            <LinkSetDb><DbTo>pmc</DbTo><LinkName>pubmed_pmc</LinkName>
              <Link><Id>7745181</Id></Link></LinkSetDb>
          </LinkSet></eLinkResult>"#;
        assert_eq!(parse_elink_pmc_id(xml).unwrap().as_deref(), Some("7745181"));
    }

    #[test]
    fn test_parse_elink_no_pmc() {
        let xml = "<eLinkResult><LinkSet><DbFrom>pubmed</DbFrom></LinkSet></eLinkResult>";
        assert!(parse_elink_pmc_id(xml).unwrap().is_none());
    }

    const PMC: &str = r#"<pmc-articleset><article>
      <front><article-meta>
        <title-group><article-title>Safety and Efficacy of a Vaccine</article-title></title-group>
        <abstract><p>We report the results of a large randomized trial.</p></abstract>
      </article-meta></front>
      <body>
        <sec><title>Introduction</title><p>Background on the disease and the <italic>vaccine</italic> candidate.</p></sec>
        <sec><title>Methods</title><p>Participants were randomly assigned.</p>
          <sec><title>Oversight</title><p>The trial was overseen.</p></sec>
        </sec>
      </body>
      <back><ref-list>
        <ref id="r1"><mixed-citation>Smith J. <article-title>First cited work</article-title>. 2019.</mixed-citation></ref>
        <ref id="r2"><element-citation><person-group><name><surname>Jones</surname></name></person-group><article-title>Second work</article-title></element-citation></ref>
      </ref-list></back>
    </article></pmc-articleset>"#;

    #[test]
    fn test_parse_pmc_fulltext() {
        let text = parse_pmc_fulltext(PMC).unwrap().unwrap();
        assert!(text.starts_with("TITLE: Safety and Efficacy of a Vaccine"));
        assert!(text.contains("ABSTRACT: We report the results"));
        assert!(text.contains("INTRODUCTION: Background on the disease and the vaccine candidate."));
        assert!(text.contains("METHODS: Participants were randomly assigned. Oversight The trial was overseen."));
        assert!(!text.contains("First cited work"));
    }

    #[test]
    fn test_parse_pmc_fulltext_too_short() {
        let xml = "<article><body><p>Short.</p></body></article>";
        assert!(parse_pmc_fulltext(xml).unwrap().is_none());
    }

    #[test]
    fn test_parse_pmc_references() {
        let refs = parse_pmc_references(PMC).unwrap();
        assert_eq!(refs, vec!["Smith J. First cited work . 2019.", "Jones Second work"]);
    }

    #[test]
    fn test_first_year() {
        assert_eq!(first_year("2020 Jan-Feb"), Some(2020));
        assert_eq!(first_year("Spring"), None);
    }
}

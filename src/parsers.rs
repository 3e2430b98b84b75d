use derive_new::new;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, value},
    multi::separated_list1,
    number::complete::double,
    sequence::{delimited, preceded, terminated},
    IResult, Parser,
};

use crate::signature::Affinity;

/// A parser for an agent, site, or state name.
pub fn ident(data: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_').parse(data)
}

/// A parser for a nonnegative decimal number.
pub fn decimal(data: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>()).parse(data)
}

// ---------------------------------------------------------------------------
// Signature expressions
// ---------------------------------------------------------------------------

/// One declared binding partner of a site, with an optional affinity
/// decoration: `a1.P`, `r.A$w`, `d.P$125.4`.
#[derive(Clone, Debug, new)]
pub struct SigPartnerDecl {
    pub site: String,
    pub agent: String,
    pub affinity: Affinity,
}

/// A site declaration inside a signature agent.
#[derive(Clone, Debug)]
pub struct SigSiteDecl {
    pub name: String,
    pub states: Vec<String>,
    pub partners: Vec<SigPartnerDecl>,
}

/// An agent declaration of a signature expression, optionally decorated
/// with an initial concentration in nM: `A@100(...)`.
#[derive(Clone, Debug)]
pub struct SigAgentDecl {
    pub name: String,
    pub init_conc: Option<f64>,
    pub sites: Vec<SigSiteDecl>,
}

fn affinity(data: &str) -> IResult<&str, Affinity> {
    alt((
        map(double, Affinity::Kd),
        value(Affinity::Default, tag("def")),
        value(Affinity::Weak, tag("w")),
        value(Affinity::Medium, tag("m")),
        value(Affinity::Strong, tag("s")),
    ))
    .parse(data)
}

/// Parses a partner stub `site.Agent` with an optional `$affinity`.
fn sig_partner(data: &str) -> IResult<&str, SigPartnerDecl> {
    let (rem, (site, _, agent, aff)) =
        (ident, tag("."), ident, opt(preceded(tag("$"), affinity))).parse(data)?;
    Ok((
        rem,
        SigPartnerDecl::new(
            site.to_owned(),
            agent.to_owned(),
            aff.unwrap_or(Affinity::Default),
        ),
    ))
}

fn states_block(data: &str) -> IResult<&str, Vec<String>> {
    delimited(
        (tag("{"), multispace0),
        separated_list1(multispace1, map(ident, str::to_owned)),
        (multispace0, tag("}")),
    )
    .parse(data)
}

fn partners_block(data: &str) -> IResult<&str, Vec<SigPartnerDecl>> {
    delimited(
        (tag("["), multispace0),
        separated_list1(multispace1, sig_partner),
        (multispace0, tag("]")),
    )
    .parse(data)
}

/// Parses one site declaration. The state and binding blocks are both
/// optional and may appear in either order.
fn sig_site(data: &str) -> IResult<&str, SigSiteDecl> {
    let (rem, name) = ident(data)?;
    let (rem, states_first) = opt(states_block).parse(rem)?;
    let (rem, partners) = opt(partners_block).parse(rem)?;
    let (rem, states_last) = opt(states_block).parse(rem)?;
    Ok((
        rem,
        SigSiteDecl {
            name: name.to_owned(),
            states: states_first.or(states_last).unwrap_or_default(),
            partners: partners.unwrap_or_default(),
        },
    ))
}

/// A separator between sites of an interface: a comma or plain whitespace.
fn site_sep(data: &str) -> IResult<&str, &str> {
    alt((delimited(multispace0, tag(","), multispace0), multispace1)).parse(data)
}

fn sig_agent(data: &str) -> IResult<&str, SigAgentDecl> {
    let (rem, (name, conc, sites)) = (
        ident,
        opt(preceded(tag("@"), double)),
        delimited(
            (tag("("), multispace0),
            opt(separated_list1(site_sep, sig_site)),
            (multispace0, tag(")")),
        ),
    )
        .parse(data)?;
    Ok((
        rem,
        SigAgentDecl {
            name: name.to_owned(),
            init_conc: conc,
            sites: sites.unwrap_or_default(),
        },
    ))
}

/// A parser for a full signature expression: a comma-separated list of
/// agent declarations.
pub fn signature_expr(data: &str) -> IResult<&str, Vec<SigAgentDecl>> {
    terminated(
        separated_list1(delimited(multispace0, tag(","), multispace0), sig_agent),
        multispace0,
    )
    .parse(data)
}

// ---------------------------------------------------------------------------
// Site-graph expressions (molecules and patterns)
// ---------------------------------------------------------------------------

/// The link field of a parsed site: `.` free, `#` don't care, `_` bound
/// somewhere, a numeric shared bond label, or a typed stub `s.A`.
#[derive(Clone, Debug, PartialEq)]
pub enum ParsedLink {
    Free,
    Wildcard,
    BoundAny,
    Label(u32),
    Stub { site: String, agent: String },
}

#[derive(Clone, Debug)]
pub struct ParsedSite {
    pub name: String,
    pub link: ParsedLink,
    pub state: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ParsedAgent {
    pub name: String,
    pub label: Option<u32>,
    pub sites: Vec<ParsedSite>,
}

/// The result of parsing a site-graph expression, before resolution
/// against a signature.
#[derive(Clone, Debug, Default)]
pub struct ParsedComplex {
    pub agents: Vec<ParsedAgent>,
}

fn link(data: &str) -> IResult<&str, ParsedLink> {
    alt((
        value(ParsedLink::Free, tag(".")),
        value(ParsedLink::Wildcard, tag("#")),
        value(ParsedLink::BoundAny, tag("_")),
        map(decimal, ParsedLink::Label),
        map((ident, tag("."), ident), |(site, _, agent)| {
            ParsedLink::Stub {
                site: site.to_owned(),
                agent: agent.to_owned(),
            }
        }),
    ))
    .parse(data)
}

fn link_block(data: &str) -> IResult<&str, ParsedLink> {
    delimited(
        (tag("["), multispace0),
        link,
        (multispace0, tag("]")),
    )
    .parse(data)
}

fn state_block(data: &str) -> IResult<&str, &str> {
    delimited(
        (tag("{"), multispace0),
        ident,
        (multispace0, tag("}")),
    )
    .parse(data)
}

/// Parses one site of a molecule or pattern expression. A site without a
/// link field is a "don't care" in patterns and free in molecules.
fn parsed_site(data: &str) -> IResult<&str, ParsedSite> {
    let (rem, name) = ident(data)?;
    let (rem, state_first) = opt(state_block).parse(rem)?;
    let (rem, link) = opt(link_block).parse(rem)?;
    let (rem, state_last) = opt(state_block).parse(rem)?;
    Ok((
        rem,
        ParsedSite {
            name: name.to_owned(),
            link: link.unwrap_or(ParsedLink::Wildcard),
            state: state_first.or(state_last).map(str::to_owned),
        },
    ))
}

fn parsed_agent(data: &str) -> IResult<&str, ParsedAgent> {
    let (rem, (label, name, sites)) = (
        opt(delimited(tag("x"), decimal, tag(":"))),
        ident,
        delimited(
            (tag("("), multispace0),
            opt(separated_list1(site_sep, parsed_site)),
            (multispace0, tag(")")),
        ),
    )
        .parse(data)?;
    Ok((
        rem,
        ParsedAgent {
            name: name.to_owned(),
            label,
            sites: sites.unwrap_or_default(),
        },
    ))
}

/// A parser for a site-graph expression: a comma-separated list of agents
/// with shared numeric bond labels.
pub fn complex_expr(data: &str) -> IResult<&str, ParsedComplex> {
    map(
        terminated(
            separated_list1(delimited(multispace0, tag(","), multispace0), parsed_agent),
            multispace0,
        ),
        |agents| ParsedComplex { agents },
    )
    .parse(data)
}

// ---------------------------------------------------------------------------
// Parameter-file directives
// ---------------------------------------------------------------------------

/// An observable declaration from a `%obs:` line.
#[derive(Clone, Debug, new)]
pub struct ObsDecl {
    pub name: Option<String>,
    pub kind: String,
    pub expr: String,
}

/// A stopping condition from a `%stp:` line.
#[derive(Clone, Debug, new)]
pub struct AlarmDecl {
    pub name: String,
    pub index: usize,
    pub threshold: f64,
}

/// One parsed line of a parameter file.
#[derive(Clone, Debug)]
pub enum Directive {
    Par { name: String, value: String },
    Sig(String),
    Rep { name: String, value: String },
    Obs(ObsDecl),
    Stp(AlarmDecl),
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    }
    .trim()
}

fn split_assignment(body: &str) -> Result<(String, String), String> {
    let (name, value) = body
        .split_once('=')
        .ok_or_else(|| format!("expected '=' in '{body}'"))?;
    Ok((name.trim().to_owned(), value.trim().to_owned()))
}

fn parse_obs(body: &str) -> Result<ObsDecl, String> {
    let body = body.trim();
    let (name, rest) = if let Some(stripped) = body.strip_prefix('"') {
        let (name, rest) = stripped
            .split_once('"')
            .ok_or_else(|| format!("unterminated observable name in '{body}'"))?;
        if name.is_empty() {
            return Err(format!("empty observable name in '{body}'"));
        }
        (Some(name.to_owned()), rest.trim_start())
    } else {
        (None, body)
    };
    let (kind, expr) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    match kind {
        "!" | "?" | "b" | "s" | "mb" | "ms" | "p" => {}
        other => return Err(format!("unknown observable kind '{other}'")),
    }
    Ok(ObsDecl::new(name, kind.to_owned(), expr.trim().to_owned()))
}

fn parse_stp(body: &str) -> Result<AlarmDecl, String> {
    let (name, threshold) = body
        .split_once('>')
        .ok_or_else(|| format!("expected '>' in stopping condition '{body}'"))?;
    let threshold: f64 = threshold
        .trim()
        .parse()
        .map_err(|_| format!("bad threshold in stopping condition '{body}'"))?;
    let name = name.trim();
    // An optional [idx] suffix selects a series of a multi-valued observable.
    if let Some((bare, idx)) = name.split_once('[') {
        let idx = idx
            .strip_suffix(']')
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| format!("bad index in stopping condition '{body}'"))?;
        Ok(AlarmDecl::new(bare.trim().to_owned(), idx, threshold))
    } else {
        Ok(AlarmDecl::new(name.to_owned(), 0, threshold))
    }
}

/// Parses one line of a parameter file. Returns `Ok(None)` for blank lines
/// and comments; unknown `%` directives are errors.
pub fn parse_directive(line: &str) -> Result<Option<Directive>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
        return Ok(None);
    }
    if let Some(body) = line.strip_prefix("%par:") {
        let (name, value) = split_assignment(strip_comment(body))?;
        return Ok(Some(Directive::Par { name, value }));
    }
    if let Some(body) = line.strip_prefix("%sig:") {
        return Ok(Some(Directive::Sig(strip_comment(body).to_owned())));
    }
    if let Some(body) = line.strip_prefix("%rep:") {
        let (name, value) = split_assignment(strip_comment(body))?;
        return Ok(Some(Directive::Rep { name, value }));
    }
    if let Some(body) = line.strip_prefix("%obs:") {
        return Ok(Some(Directive::Obs(parse_obs(strip_comment(body))?)));
    }
    if let Some(body) = line.strip_prefix("%stp:") {
        return Ok(Some(Directive::Stp(parse_stp(strip_comment(body))?)));
    }
    if line.starts_with('%') {
        return Err(format!("unknown directive in '{line}'"));
    }
    Ok(None)
}

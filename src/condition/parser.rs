//! The condition grammar parser.
//!
//! Conditions in the standard are semi-structured English. The grammar
//! here recognizes the recurring phrasings compositionally: presence and
//! absence, equality and numeric comparison against literal values with
//! an optional value-index selector, and/or combination with "and"
//! binding tighter than "or", and a trailing "may be present otherwise"
//! clause. Everything else is deliberately given up on: a condition
//! that cannot be read becomes [`Condition::Unparseable`], never a parse
//! error. A sizable share of the corpus describes information a checker
//! cannot see (other data sets, acquisition circumstances), and those
//! must degrade to "undecidable" rather than fail the run.

use dicom_core::Tag;

use super::{
    Comparison, Condition, ConditionalRequirement, Otherwise, RequirementMeaning,
};
use crate::model::{parse_tag_id, TagDictionary};

/// Parses condition prose into [`ConditionalRequirement`] values.
///
/// Attribute names in the prose are resolved through the tag dictionary
/// of the reference model. Parsing is total and pure; results for
/// repeated texts are typically shared through a
/// [`ConditionCache`](super::ConditionCache).
#[derive(Debug)]
pub struct ConditionParser<'d> {
    dict: &'d TagDictionary,
}

/// Requirement prefixes announcing that a condition follows.
const PRESENT_PREFIXES: &[&str] = &[
    "required if",
    "shall be present if",
    "required for images where",
    "required only if",
];
const ABSENT_PREFIX: &str = "shall not be present if";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Op {
    Present,
    Absent,
    NotEmpty,
    Equals,
    NotEquals,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    NonZero,
    PointsTo,
}

/// Operator phrasings in match order: a phrase must come before any of
/// its own prefixes.
const OPERATOR_PHRASES: &[(&str, Op)] = &[
    ("is not sent", Op::Absent),
    ("is not present in this sequence item", Op::Absent),
    ("is not present", Op::Absent),
    ("is absent", Op::Absent),
    ("are not present", Op::Absent),
    ("is non-null", Op::NotEmpty),
    ("is non-zero length", Op::NotEmpty),
    ("equals other than", Op::NotEquals),
    ("value is not", Op::NotEquals),
    ("is not equal to", Op::NotEquals),
    ("is not any of", Op::NotEquals),
    ("is not:", Op::NotEquals),
    ("is other than", Op::NotEquals),
    ("is present with a value other than", Op::NotEquals),
    ("is not", Op::NotEquals),
    ("has a value of more than", Op::Greater),
    ("is present and has a value greater than", Op::Greater),
    ("has a value greater than", Op::Greater),
    ("is greater than or equal to", Op::GreaterOrEqual),
    ("is greater than", Op::Greater),
    ("is less than or equal to", Op::LessOrEqual),
    ("is less than", Op::Less),
    ("is non-zero", Op::NonZero),
    ("is present and the value is", Op::Equals),
    ("is present and has a value of", Op::Equals),
    ("is present and has the value", Op::Equals),
    ("is present and is either", Op::Equals),
    ("is present with value", Op::Equals),
    ("is present and equals", Op::Equals),
    ("is present with a value of", Op::Equals),
    ("is set to", Op::Equals),
    ("equals one of the following values:", Op::Equals),
    ("at the image level equals", Op::Equals),
    ("equals", Op::Equals),
    ("is one of the following:", Op::Equals),
    ("is equal to", Op::Equals),
    ("has the value", Op::Equals),
    ("has a value of", Op::Equals),
    ("has value", Op::Equals),
    ("value is", Op::Equals),
    ("=", Op::Equals),
    ("is present and has a value", Op::NotEmpty),
    ("is present with a value", Op::NotEmpty),
    ("has a value", Op::NotEmpty),
    ("is present in this sequence item", Op::Present),
    ("is present", Op::Present),
    ("exists", Op::Present),
    ("is sent", Op::Present),
    ("are present", Op::Present),
    ("points to", Op::PointsTo),
    ("is:", Op::Equals),
    ("is", Op::Equals),
];

const UNIT_WORDS: &[&str] = &["ms", "mAs", "mA", "mGy", "uS", "uA", "ppm", "yyy", "zzz"];

/// Lowercase words that terminate a tag name instead of connecting its
/// parts ("Number of Frames" connects with "of"; "is", "and" never do).
const NON_CONNECTOR_WORDS: &[&str] = &["is", "not", "or", "and", "equals"];

/// A failed branch; the caller backtracks or gives the whole text up.
struct ParseFail;

type ParseResult<T> = Result<T, ParseFail>;

#[derive(Debug, Clone)]
enum TagRef {
    Attribute { tag: Tag, index: u32 },
    Macro(String),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ListSep {
    Comma,
    And,
    Or,
}

impl<'d> ConditionParser<'d> {
    /// Create a parser resolving names through the given dictionary.
    pub fn new(dict: &'d TagDictionary) -> Self {
        ConditionParser { dict }
    }

    /// Parse the given condition text. Never fails: text that cannot be
    /// read yields an all-permissive requirement around
    /// [`Condition::Unparseable`].
    pub fn parse(&self, text: &str) -> ConditionalRequirement {
        let collapsed = collapse_whitespace(text);
        let lower = collapsed.to_lowercase();

        // functional group placement restrictions carry no tag condition;
        // placement itself is enforced by the functional group resolver
        if lower.contains("not be used as a shared functional group")
            || lower.contains("not be used as a per-frame functional group")
            || lower.contains("shall be used as a shared functional group")
        {
            return ConditionalRequirement::unparseable(text.trim());
        }

        let (meaning, rest) = match find_prefix(&collapsed, &lower) {
            Some(found) => found,
            None => return ConditionalRequirement::unparseable(text.trim()),
        };

        let rest = normalize(rest);
        let mut scanner = Scanner::new(&rest);
        let condition = match self.parse_or(&mut scanner, None) {
            Ok(condition) => condition,
            Err(ParseFail) => return ConditionalRequirement::unparseable(text.trim()),
        };
        self.skip_explanation(&mut scanner);

        let tail = scanner.rest().trim_start();
        let (condition, surgery, benign) = settle_tail(condition, tail);
        let condition = match condition {
            Some(condition) => condition,
            None => return ConditionalRequirement::unparseable(text.trim()),
        };

        if meaning == RequirementMeaning::AbsentIf {
            return ConditionalRequirement {
                meaning,
                condition,
                otherwise: Otherwise::Allowed,
            };
        }

        let otherwise = self.parse_otherwise(tail, surgery, benign);
        ConditionalRequirement {
            meaning,
            condition,
            otherwise,
        }
    }

    /// Decide the fallback clause from the unconsumed sentence tail.
    fn parse_otherwise(&self, tail: &str, surgery: bool, benign_leftover: bool) -> Otherwise {
        let lower = tail.to_lowercase();
        if let Some(at) = lower.find("may be present") {
            let mut scanner = Scanner::new(&tail[at + "may be present".len()..]);
            scanner.eat_ci("otherwise");
            scanner.eat_ci("only");
            if scanner.eat_ci("if") {
                if let Ok(condition) = self.parse_or(&mut scanner, None) {
                    return Otherwise::If(condition);
                }
            }
            return Otherwise::Allowed;
        }
        if lower.contains("not be present otherwise") {
            return Otherwise::NotAllowed;
        }
        if surgery || benign_leftover {
            // part of the requirement was not understood; it may have
            // held an allowance, so do not forbid
            return Otherwise::Allowed;
        }
        Otherwise::NotAllowed
    }

    /// expr := and_expr (or_sep and_expr)*
    fn parse_or(&self, sc: &mut Scanner<'_>, inherit: Option<Tag>) -> ParseResult<Condition> {
        let first = self.parse_and(sc, inherit)?;
        let mut terms = vec![first];
        loop {
            let mark = sc.save();
            if !eat_or_sep(sc) {
                break;
            }
            let inherited = inherit.or_else(|| leftmost_tag(&terms[0]));
            match self.parse_and(sc, inherited) {
                Ok(term) => terms.push(term),
                Err(ParseFail) => {
                    // an or-alternative we cannot read is dropped; the
                    // tail handling decides what that costs
                    sc.restore(mark);
                    break;
                }
            }
        }
        Ok(if terms.len() > 1 {
            Condition::Or(terms)
        } else {
            terms.swap_remove(0)
        })
    }

    /// and_expr := primary (and_sep primary)*
    fn parse_and(&self, sc: &mut Scanner<'_>, inherit: Option<Tag>) -> ParseResult<Condition> {
        let first = self.parse_primary(sc, inherit)?;
        let mut terms = vec![first];
        loop {
            let mark = sc.save();
            if !eat_and_sep(sc) {
                break;
            }
            let inherited = inherit.or_else(|| leftmost_tag(&terms[0]));
            match self.parse_primary(sc, inherited) {
                Ok(term) => terms.push(term),
                Err(ParseFail) => {
                    sc.restore(mark);
                    break;
                }
            }
        }
        Ok(if terms.len() > 1 {
            Condition::And(terms)
        } else {
            terms.swap_remove(0)
        })
    }

    /// primary := "(" expr ")" | simple condition | tag-less condition
    fn parse_primary(&self, sc: &mut Scanner<'_>, inherit: Option<Tag>) -> ParseResult<Condition> {
        let mark = sc.save();
        // parenthesized grouping; a "(gggg,eeee)" tag id is not a group
        if sc.peek_tag_id().is_none() && sc.eat_char('(') {
            if let Ok(inner) = self.parse_or(sc, inherit) {
                if sc.eat_char(')') {
                    return Ok(inner);
                }
            }
            sc.restore(mark);
        }
        match self.parse_simple(sc) {
            Ok(condition) => Ok(condition),
            Err(ParseFail) => {
                sc.restore(mark);
                self.parse_tagless(sc, inherit)
            }
        }
    }

    /// A condition with its own tag expression(s):
    /// `tag (sep tag)* operator [values]`.
    fn parse_simple(&self, sc: &mut Scanner<'_>) -> ParseResult<Condition> {
        let mut tags = vec![self.parse_tag_expr(sc)?];
        let mut seps: Vec<ListSep> = Vec::new();
        loop {
            let mark = sc.save();
            let sep = if sc.eat_ci(", and") {
                ListSep::And
            } else if sc.eat_ci(", or") {
                ListSep::Or
            } else if sc.eat_char(',') {
                ListSep::Comma
            } else if sc.eat_ci("and") {
                ListSep::And
            } else if sc.eat_ci("or") {
                ListSep::Or
            } else {
                break;
            };
            match self.parse_tag_expr(sc) {
                Ok(tag) => {
                    seps.push(sep);
                    tags.push(tag);
                }
                Err(ParseFail) => {
                    sc.restore(mark);
                    break;
                }
            }
        }

        let (op, values, target) = self.parse_operator_and_values(sc)?;
        self.skip_in_module(sc);
        if tags.len() == 1 {
            return self.leaf(tags.remove(0), op, &values, target);
        }

        let has_and = seps.contains(&ListSep::And);
        let has_or = seps.contains(&ListSep::Or);
        let mut leaves = Vec::with_capacity(tags.len());
        for tag in tags {
            leaves.push(self.leaf(tag, op, &values, target)?);
        }
        Ok(if has_and && has_or {
            // "A, B or C and D ...": the or-run groups ahead of the and
            let split = seps.iter().position(|s| *s == ListSep::And).map(|i| i + 1);
            let split = split.unwrap_or(leaves.len() - 1);
            let tail: Vec<Condition> = leaves.split_off(split);
            let mut combined = vec![Condition::Or(leaves)];
            combined.extend(tail);
            Condition::And(combined)
        } else if has_and || seps.iter().all(|s| *s == ListSep::Comma) {
            Condition::And(leaves)
        } else {
            Condition::Or(leaves)
        })
    }

    /// A condition without a tag of its own ("... or is DERIVED"),
    /// inheriting the tag of its left sibling.
    fn parse_tagless(&self, sc: &mut Scanner<'_>, inherit: Option<Tag>) -> ParseResult<Condition> {
        let tag = inherit.ok_or(ParseFail)?;
        let mut index = 0;
        let mark = sc.save();
        if sc.eat_ci("value") {
            match sc.eat_small_number() {
                Some(n @ 1..=4) => index = n - 1,
                _ => sc.restore(mark),
            }
        }
        let (op, values, target) = self.parse_operator_and_values(sc)?;
        self.skip_in_module(sc);
        self.leaf(TagRef::Attribute { tag, index }, op, &values, target)
    }

    fn parse_operator_and_values(
        &self,
        sc: &mut Scanner<'_>,
    ) -> ParseResult<(Op, Vec<String>, Option<u32>)> {
        let mark = sc.save();
        // an optional "the value" filler before the operator
        if !sc.eat_ci("the value") {
            sc.eat_ci("value");
        }
        let op = match self.parse_operator(sc) {
            Some(op) => op,
            None => {
                sc.restore(mark);
                self.parse_operator(sc).ok_or(ParseFail)?
            }
        };
        match op {
            Op::Present | Op::Absent | Op::NotEmpty => Ok((op, Vec::new(), None)),
            Op::NonZero => Ok((Op::NotEquals, vec!["0".to_string()], None)),
            Op::PointsTo => {
                let target = match self.parse_tag_expr(sc)? {
                    TagRef::Attribute { tag, .. } => {
                        (u32::from(tag.group()) << 16) | u32::from(tag.element())
                    }
                    TagRef::Macro(_) => return Err(ParseFail),
                };
                Ok((op, Vec::new(), Some(target)))
            }
            Op::Equals | Op::NotEquals => {
                let values = self.parse_values(sc);
                if values.is_empty() {
                    return Err(ParseFail);
                }
                Ok((op, values, None))
            }
            Op::Greater | Op::Less | Op::GreaterOrEqual | Op::LessOrEqual => {
                let values = self.parse_values(sc);
                match values.first().map(|v| v.trim().parse::<f64>()) {
                    Some(Ok(_)) => Ok((op, values, None)),
                    _ => Err(ParseFail),
                }
            }
        }
    }

    fn parse_operator(&self, sc: &mut Scanner<'_>) -> Option<Op> {
        for (phrase, op) in OPERATOR_PHRASES {
            if sc.eat_ci(phrase) {
                return Some(*op);
            }
        }
        None
    }

    fn leaf(
        &self,
        tag_ref: TagRef,
        op: Op,
        values: &[String],
        target: Option<u32>,
    ) -> ParseResult<Condition> {
        match tag_ref {
            TagRef::Macro(name) => match op {
                Op::Present => Ok(Condition::MacroPresent { name }),
                Op::Absent => Ok(Condition::MacroAbsent { name }),
                _ => Err(ParseFail),
            },
            TagRef::Attribute { tag, index } => match op {
                Op::Present => Ok(Condition::TagPresent { tag }),
                Op::Absent => Ok(Condition::TagAbsent { tag }),
                Op::NotEmpty => Ok(Condition::TagNotEmpty { tag }),
                Op::Equals => Ok(Condition::ValueEquals {
                    tag,
                    index,
                    values: values.to_vec(),
                }),
                Op::NotEquals => Ok(Condition::ValueNotEquals {
                    tag,
                    index,
                    values: values.to_vec(),
                }),
                Op::Greater | Op::Less | Op::GreaterOrEqual | Op::LessOrEqual => {
                    let value = values
                        .first()
                        .and_then(|v| v.trim().parse::<f64>().ok())
                        .ok_or(ParseFail)?;
                    let ordering = match op {
                        Op::Greater => Comparison::Greater,
                        Op::Less => Comparison::Less,
                        Op::GreaterOrEqual => Comparison::GreaterOrEqual,
                        _ => Comparison::LessOrEqual,
                    };
                    Ok(Condition::ValueCompare {
                        tag,
                        index,
                        ordering,
                        value,
                    })
                }
                Op::PointsTo => Ok(Condition::PointsTo {
                    tag,
                    target: target.ok_or(ParseFail)?,
                }),
                Op::NonZero => Err(ParseFail),
            },
        }
    }

    /// `[value index] [fillers] [tag id] name [tag id] [", Value n"]`
    fn parse_tag_expr(&self, sc: &mut Scanner<'_>) -> ParseResult<TagRef> {
        let start = sc.save();
        let mut index = self.parse_value_index(sc);

        // filler words before the name
        loop {
            if sc.eat_ci("the value of")
                || sc.eat_ci("the value for")
                || sc.eat_ci("a value of")
                || sc.eat_ci("value of")
                || sc.eat_ci("value for")
                || sc.eat_ci("either")
                || sc.eat_ci("attribute")
                || sc.eat_ci("the")
                || sc.eat_ci("a")
            {
                continue;
            }
            break;
        }

        let id_before = sc.eat_tag_id();
        let (name, caps_fallback) = self.parse_tag_name(sc);
        let id_after = if name.is_some() { sc.eat_tag_id() } else { None };
        let tag_id = id_before.or(id_after);

        let resolved = match (tag_id, &name) {
            (Some(id), None) => Some(TagRef::Attribute { tag: id, index: 0 }),
            (Some(id), Some(name)) => self
                .check_name_against_id(id, name)
                .then_some(TagRef::Attribute { tag: id, index: 0 }),
            (None, Some(name)) => self.resolve_name(sc, name, caps_fallback),
            (None, None) => None,
        };
        let mut resolved = match resolved {
            Some(tag_ref) => tag_ref,
            None => {
                sc.restore(start);
                return Err(ParseFail);
            }
        };

        // a trailing value selector: ", Value 2" or "Value 2"
        let mark = sc.save();
        sc.eat_char(',');
        if sc.eat_ci("value") {
            match sc.eat_small_number() {
                Some(n @ 1..=9) => index = Some(n - 1),
                _ => sc.restore(mark),
            }
        } else {
            sc.restore(mark);
        }
        if let (TagRef::Attribute { index: slot, .. }, Some(chosen)) = (&mut resolved, index) {
            *slot = chosen;
        }

        let _ = sc.eat_ci("of this frame");
        self.skip_in_module(sc);
        Ok(resolved)
    }

    /// "Value 2 of" / "the first value of" ahead of a tag name.
    fn parse_value_index(&self, sc: &mut Scanner<'_>) -> Option<u32> {
        let mark = sc.save();
        if sc.eat_ci("the") {
            let ordinal = if sc.eat_ci("first") {
                Some(0)
            } else if sc.eat_ci("second") {
                Some(1)
            } else if sc.eat_ci("third") {
                Some(2)
            } else {
                None
            };
            if let Some(index) = ordinal {
                if sc.eat_ci("value") && sc.eat_ci("of") {
                    return Some(index);
                }
            }
            sc.restore(mark);
            return None;
        }
        if sc.eat_ci("value") {
            if let Some(n @ 1..=9) = sc.eat_small_number() {
                if sc.eat_ci("of") {
                    return Some(n - 1);
                }
            }
            sc.restore(mark);
        }
        None
    }

    /// Collect the attribute name: a run of capitalized words, optionally
    /// continued over lowercase connectors ("Number of Frames"). Returns
    /// the full greedy name and the position/length of the plain
    /// capitalized run, for backtracking when the greedy name resolves to
    /// nothing.
    fn parse_tag_name(&self, sc: &mut Scanner<'_>) -> (Option<String>, Option<(usize, String)>) {
        let mut words: Vec<&str> = Vec::new();
        let mut caps_run: Option<(usize, usize)> = None; // (scanner pos, word count)
        loop {
            let mark = sc.save();
            let word = match sc.peek_word() {
                Some(word) => word,
                None => break,
            };
            if is_caps_word(word) || (!words.is_empty() && is_unit_word(word)) {
                // a "Value n" selector is not part of the name
                if word.eq_ignore_ascii_case("value") && !words.is_empty() {
                    let probe = sc.save();
                    sc.next_word();
                    let digit_follows = sc
                        .peek_word()
                        .map(|w| w.len() == 1 && w.as_bytes()[0].is_ascii_digit())
                        .unwrap_or(false);
                    sc.restore(probe);
                    if digit_follows {
                        break;
                    }
                }
                sc.next_word();
                words.push(word);
                if caps_run.is_none() || caps_run.map(|(_, n)| n + 1 == words.len()).unwrap_or(false)
                {
                    caps_run = Some((sc.save(), words.len()));
                }
            } else if !words.is_empty() && is_connector_word(word) {
                // lowercase run must lead to further capitalized words
                let mut run = vec![word];
                sc.next_word();
                while let Some(next) = sc.peek_word() {
                    if is_connector_word(next) {
                        run.push(next);
                        sc.next_word();
                    } else {
                        break;
                    }
                }
                if sc.peek_word().map(is_caps_word).unwrap_or(false) {
                    words.extend(run);
                } else {
                    sc.restore(mark);
                    break;
                }
            } else {
                break;
            }
        }
        if words.is_empty() {
            return (None, None);
        }
        let full = words.join(" ");
        let fallback = caps_run.map(|(pos, count)| (pos, words[..count].join(" ")));
        (Some(full), fallback)
    }

    /// Resolve a name with no tag id next to it. Falls back from the
    /// greedy name to its leading capitalized run, then to a functional
    /// group macro reference.
    fn resolve_name(
        &self,
        sc: &mut Scanner<'_>,
        name: &str,
        caps_fallback: Option<(usize, String)>,
    ) -> Option<TagRef> {
        if let Some(tag) = self.dict.tag_by_name(name) {
            return Some(TagRef::Attribute { tag, index: 0 });
        }
        if let Some(macro_ref) = macro_reference(name) {
            return Some(macro_ref);
        }
        if let Some((pos, short)) = caps_fallback {
            if short != name {
                if let Some(tag) = self.dict.tag_by_name(&short) {
                    sc.restore(pos);
                    return Some(TagRef::Attribute { tag, index: 0 });
                }
                if let Some(macro_ref) = macro_reference(&short) {
                    sc.restore(pos);
                    return Some(macro_ref);
                }
            }
        }
        None
    }

    /// Whether a written name plausibly denotes the attribute with this
    /// tag id. The standard's prose takes liberties with names, so this
    /// is deliberately lenient.
    fn check_name_against_id(&self, id: Tag, name: &str) -> bool {
        let entry = match self.dict.entry(id) {
            Some(entry) => entry,
            // id given but unknown to the dictionary: trust the id
            None => return true,
        };
        if entry.name == name {
            return true;
        }
        let real = entry.name.replace('-', " ");
        let written = name.replace('-', " ");
        let real_parts: Vec<&str> = real.split_whitespace().collect();
        let parts: Vec<&str> = written.split_whitespace().collect();
        if real_parts.len() < parts.len() {
            return false;
        }
        let len_diff = real_parts.len() - parts.len();
        // second name part may be left out
        if real_parts.len() > 2 {
            let mut shortened = vec![real_parts[0]];
            shortened.extend(&real_parts[2..]);
            if shortened == parts {
                return true;
            }
        }
        // name parts may trade places
        if len_diff == 0 {
            let mut a = real_parts.clone();
            let mut b = parts.clone();
            a.sort_unstable();
            b.sort_unstable();
            if a == b {
                return true;
            }
        }
        // leading parts may be dropped; compare initials of the rest
        real_parts[len_diff..]
            .iter()
            .zip(&parts)
            .all(|(a, b)| a.chars().next() == b.chars().next())
    }

    /// "in the <name> Module" qualifies the tag without restricting it.
    fn skip_in_module(&self, sc: &mut Scanner<'_>) {
        let mark = sc.save();
        if !sc.eat_ci("in the") {
            return;
        }
        let mut saw_module = false;
        while let Some(word) = sc.peek_word() {
            let is_module = word.eq_ignore_ascii_case("module");
            if word.chars().all(|c| c.is_ascii_alphabetic()) {
                sc.next_word();
                if is_module {
                    saw_module = true;
                    break;
                }
            } else {
                break;
            }
        }
        if !saw_module {
            sc.restore(mark);
        }
    }

    fn parse_values(&self, sc: &mut Scanner<'_>) -> Vec<String> {
        let mut values = Vec::new();
        match self.parse_value_item(sc) {
            Some(value) => values.push(value),
            None => return values,
        }
        loop {
            let mark = sc.save();
            let has_sep = sc.eat_ci(", or")
                || sc.eat_ci(", and")
                || sc.eat_char(',')
                || sc.eat_ci("or")
                || sc.eat_ci("and");
            if !has_sep {
                break;
            }
            match self.parse_value_item(sc) {
                Some(value) => values.push(value),
                None => {
                    sc.restore(mark);
                    break;
                }
            }
        }
        values
    }

    fn parse_value_item(&self, sc: &mut Scanner<'_>) -> Option<String> {
        sc.skip_ws();
        if let Some(value) = sc.eat_quoted() {
            let value = uid_of_quoted(&value).unwrap_or(value);
            self.skip_gloss(sc);
            return Some(value);
        }
        if sc.eat_ci("zero-length") || sc.eat_ci("zero length") {
            return Some(String::new());
        }
        if let Some(tag) = sc.eat_tag_id() {
            let word = (u32::from(tag.group()) << 16) | u32::from(tag.element());
            return Some(word.to_string());
        }
        if let Some(uid) = self.parse_sop_class_value(sc) {
            return Some(uid);
        }
        if sc.eat_ci("zero") {
            return Some("0".to_string());
        }
        if let Some(number) = sc.eat_number() {
            return Some(number);
        }
        if let Some(value) = self.parse_caps_value(sc) {
            self.skip_gloss(sc);
            return Some(value);
        }
        if let Some(value) = self.parse_mixed_value(sc) {
            self.skip_gloss(sc);
            return Some(value);
        }
        None
    }

    /// "<SOP Class Name> ("1.2.840....") [Storage SOP Class]": the value
    /// is the UID; the surrounding words are dropped.
    fn parse_sop_class_value(&self, sc: &mut Scanner<'_>) -> Option<String> {
        let mark = sc.save();
        let mut any = false;
        while let Some(word) = sc.peek_word() {
            if is_caps_word(word) && !word.eq_ignore_ascii_case("or") {
                sc.next_word();
                any = true;
            } else {
                break;
            }
        }
        if !any || !sc.eat_char('(') {
            sc.restore(mark);
            return None;
        }
        let uid = match sc.eat_quoted().and_then(|q| uid_of_quoted(&q)) {
            Some(uid) => uid,
            None => {
                sc.restore(mark);
                return None;
            }
        };
        if !sc.eat_char(')') {
            sc.restore(mark);
            return None;
        }
        if sc.eat_ci("storage sop classes") || sc.eat_ci("storage sop class") {
            // suffix carries no information
        }
        Some(uid)
    }

    /// ALL-CAPS literal, possibly several words ("PALETTE COLOR").
    fn parse_caps_value(&self, sc: &mut Scanner<'_>) -> Option<String> {
        let mut words: Vec<&str> = Vec::new();
        loop {
            let word = match sc.peek_word() {
                Some(word) => word,
                None => break,
            };
            let all_caps = !word.is_empty()
                && word
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
            if all_caps {
                sc.next_word();
                words.push(word);
            } else {
                break;
            }
        }
        if words.is_empty() {
            None
        } else {
            Some(words.join(" "))
        }
    }

    /// Mixed-case literal ("Bits aligned"), first word capitalized.
    fn parse_mixed_value(&self, sc: &mut Scanner<'_>) -> Option<String> {
        let first = sc.peek_word()?;
        let mut chars = first.chars();
        let leading_upper = chars.next().map(|c| c.is_ascii_uppercase()).unwrap_or(false);
        if !leading_upper || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return None;
        }
        sc.next_word();
        let mut words = vec![first];
        while let Some(word) = sc.peek_word() {
            let continuation = word.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                && !matches!(
                    word,
                    "or" | "and" | "may" | "shall" | "if" | "is" | "are" | "the" | "be"
                );
            if continuation {
                sc.next_word();
                words.push(word);
            } else {
                break;
            }
        }
        Some(words.join(" "))
    }

    /// A parenthesized gloss after a value ("(Uncompressed)").
    fn skip_gloss(&self, sc: &mut Scanner<'_>) {
        let mark = sc.save();
        if !sc.eat_char('(') {
            return;
        }
        let rest = sc.rest();
        let end = rest.find(')');
        match end {
            Some(end)
                if rest[..end]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '/' | '\'')) =>
            {
                sc.advance(end + 1);
            }
            _ => sc.restore(mark),
        }
    }

    /// A trailing ", <clarification>" up to the end of the sentence.
    fn skip_explanation(&self, sc: &mut Scanner<'_>) {
        let mark = sc.save();
        if !sc.eat_char(',') {
            return;
        }
        if let Some(word) = sc.peek_word() {
            if word.eq_ignore_ascii_case("and") || word.eq_ignore_ascii_case("or") {
                sc.restore(mark);
                return;
            }
        }
        let rest = sc.rest();
        let end = rest.find(['.', ';', ':']).unwrap_or(rest.len());
        sc.advance(end);
    }
}

/// What to make of the unconsumed tail after the main condition:
/// possibly repaired condition, whether an and-branch was cut, and
/// whether readable content was left behind.
fn settle_tail(condition: Condition, tail: &str) -> (Option<Condition>, bool, bool) {
    let trimmed = tail.trim_start();
    if trimmed.is_empty() {
        return (Some(condition), false, false);
    }
    let lower = trimmed.to_lowercase();
    let benign = lower.starts_with('.')
        || lower.starts_with(';')
        || lower.starts_with(':')
        || lower.starts_with("or ")
        || lower.starts_with(", or ");
    if benign {
        let leftover = trimmed.trim_start_matches(['.', ';', ':', ' ']);
        return (Some(condition), false, !leftover.is_empty());
    }
    if lower.starts_with("and ") || lower.starts_with(", and ") {
        // an and-branch we cannot read invalidates the alternative it was
        // attached to
        return match condition {
            Condition::Or(mut terms) => {
                if terms.len() > 2 {
                    terms.pop();
                    (Some(Condition::Or(terms)), true, true)
                } else {
                    (Some(terms.swap_remove(0)), true, true)
                }
            }
            _ => (None, true, true),
        };
    }
    (None, false, true)
}

fn find_prefix<'a>(text: &'a str, lower: &str) -> Option<(RequirementMeaning, &'a str)> {
    let absent = lower
        .find(ABSENT_PREFIX)
        .map(|at| (at, at + ABSENT_PREFIX.len(), RequirementMeaning::AbsentIf));
    let present = PRESENT_PREFIXES
        .iter()
        .filter_map(|prefix| {
            lower
                .find(prefix)
                .map(|at| (at, at + prefix.len(), RequirementMeaning::PresentIf))
        })
        .min_by_key(|(at, ..)| *at);
    let (_, end, meaning) = match (absent, present) {
        (Some(a), Some(p)) => {
            if a.0 <= p.0 {
                a
            } else {
                p
            }
        }
        (Some(a), None) => a,
        (None, Some(p)) => p,
        (None, None) => return None,
    };
    text.get(end..).map(|rest| (meaning, rest))
}

/// Quirks of the prose that are easier to repair up front than to
/// express in the grammar.
fn normalize(text: &str) -> String {
    let mut text = text.replace("(Legacy Converted)", "");
    // "..., may be present otherwise" needs a sentence boundary to be
    // recognized as a fallback clause
    let lower = text.to_lowercase();
    if let Some(at) = lower.find(" may be present otherwise") {
        if at > 0 && text.is_char_boundary(at) && text.is_char_boundary(at - 1) {
            let before = text.as_bytes()[at - 1];
            if before == b',' || before == b';' {
                text.replace_range(at - 1..at, ".");
            } else if before != b'.' {
                text.insert(at, '.');
            }
        }
    }
    // an appositive replaces its head: "..., that is X, ..." reads as X
    let lower = text.to_lowercase();
    if let Some(at) = lower.find(", that is ") {
        let cut = at + ", that is ".len();
        if text.is_char_boundary(cut) {
            text.replace_range(..cut, "");
        }
    }
    text.trim().to_string()
}

fn collapse_whitespace(text: &str) -> String {
    itertools::join(text.split_whitespace(), " ")
}

fn leftmost_tag(condition: &Condition) -> Option<Tag> {
    match condition {
        Condition::TagPresent { tag }
        | Condition::TagAbsent { tag }
        | Condition::TagNotEmpty { tag }
        | Condition::ValueEquals { tag, .. }
        | Condition::ValueNotEquals { tag, .. }
        | Condition::ValueCompare { tag, .. }
        | Condition::PointsTo { tag, .. } => Some(*tag),
        Condition::And(inner) | Condition::Or(inner) => inner.first().and_then(leftmost_tag),
        _ => None,
    }
}

fn eat_and_sep(sc: &mut Scanner<'_>) -> bool {
    if sc.eat_ci(", and") || sc.eat_ci("and") {
        if !sc.eat_ci("whose") {
            sc.eat_ci("if");
        }
        true
    } else {
        false
    }
}

fn eat_or_sep(sc: &mut Scanner<'_>) -> bool {
    if sc.eat_ci(", or") || sc.eat_ci("or") {
        sc.eat_ci("if");
        true
    } else {
        false
    }
}

fn is_caps_word(word: &str) -> bool {
    if word == "2D" || word == "3D" {
        return true;
    }
    let mut chars = word.chars();
    let leading_upper = chars.next().map(|c| c.is_ascii_uppercase()).unwrap_or(false);
    word.len() >= 2
        && leading_upper
        && chars.all(|c| c.is_ascii_alphabetic() || c == '\'' || c == '-')
}

fn is_unit_word(word: &str) -> bool {
    UNIT_WORDS.contains(&word)
}

fn is_connector_word(word: &str) -> bool {
    !NON_CONNECTOR_WORDS.contains(&word)
        && !is_unit_word(word)
        && word
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

/// A functional group macro mentioned by name in tag position.
fn macro_reference(name: &str) -> Option<TagRef> {
    for suffix in [" Functional Group Macro", " Functional Group"] {
        if let Some(prefix) = name.strip_suffix(suffix) {
            if !prefix.is_empty() {
                return Some(TagRef::Macro(prefix.to_string()));
            }
        }
    }
    None
}

/// The UID inside a quoted value, dropping a parenthesized gloss.
fn uid_of_quoted(quoted: &str) -> Option<String> {
    let uid = quoted.split(" (").next().unwrap_or(quoted).trim();
    let valid = uid.contains('.')
        && !uid.is_empty()
        && uid.chars().all(|c| c.is_ascii_digit() || c == '.');
    valid.then(|| uid.to_string())
}

/// Cursor over whitespace-collapsed condition text.
#[derive(Debug)]
struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Scanner { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn save(&self) -> usize {
        self.pos
    }

    fn restore(&mut self, mark: usize) {
        self.pos = mark;
    }

    fn advance(&mut self, by: usize) {
        self.pos = (self.pos + by).min(self.text.len());
    }

    fn skip_ws(&mut self) {
        while self.rest().starts_with(' ') {
            self.pos += 1;
        }
    }

    /// Consume a phrase, case-insensitively, on a word boundary.
    fn eat_ci(&mut self, phrase: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        let candidate = match rest.get(..phrase.len()) {
            Some(candidate) => candidate,
            None => return false,
        };
        if !candidate.eq_ignore_ascii_case(phrase) {
            return false;
        }
        let ends_in_word = phrase.chars().last().map(is_word_char).unwrap_or(false);
        if ends_in_word {
            if let Some(next) = rest[phrase.len()..].chars().next() {
                if is_word_char(next) {
                    return false;
                }
            }
        }
        self.pos += phrase.len();
        true
    }

    fn eat_char(&mut self, wanted: char) -> bool {
        self.skip_ws();
        if self.rest().starts_with(wanted) {
            self.pos += wanted.len_utf8();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> Option<&'a str> {
        let mut probe = Scanner {
            text: self.text,
            pos: self.pos,
        };
        probe.next_word()
    }

    fn next_word(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let end = rest.find(|c: char| !is_word_char(c)).unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        let word = &rest[..end];
        self.pos += end;
        Some(word)
    }

    /// A single-digit number as its own word.
    fn eat_small_number(&mut self) -> Option<u32> {
        let mark = self.save();
        let word = self.next_word()?;
        if word.len() == 1 && word.as_bytes()[0].is_ascii_digit() {
            Some(u32::from(word.as_bytes()[0] - b'0'))
        } else {
            self.restore(mark);
            None
        }
    }

    /// A number literal; a trailing full stop is sentence punctuation.
    fn eat_number(&mut self) -> Option<String> {
        self.skip_ws();
        let rest = self.rest();
        let bytes = rest.as_bytes();
        let mut end = 0;
        if end < bytes.len() && (bytes[end] == b'-' || bytes[end] == b'+') {
            end += 1;
        }
        let digits_start = end;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end == digits_start {
            return None;
        }
        if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
        // numbers do not run into words
        if bytes.get(end).map(|b| is_word_char(*b as char)).unwrap_or(false) {
            return None;
        }
        let number = rest[..end].to_string();
        self.pos += end;
        Some(number)
    }

    /// A double-quoted chunk, quotes dropped.
    fn eat_quoted(&mut self) -> Option<String> {
        self.skip_ws();
        let rest = self.rest();
        let inner = rest.strip_prefix('"')?;
        let close = inner.find('"')?;
        let value = inner[..close].to_string();
        self.pos += close + 2;
        Some(value)
    }

    fn peek_tag_id(&self) -> Option<Tag> {
        let mut probe = Scanner {
            text: self.text,
            pos: self.pos,
        };
        probe.eat_tag_id()
    }

    /// A "(gggg,eeee)" tag id.
    fn eat_tag_id(&mut self) -> Option<Tag> {
        self.skip_ws();
        let rest = self.rest();
        let candidate = rest.get(..11)?;
        if !candidate.starts_with('(') || !candidate.ends_with(')') {
            return None;
        }
        let tag = parse_tag_id(candidate)?;
        self.pos += 11;
        Some(tag)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '\'' || c == '-' || c == '_'
}

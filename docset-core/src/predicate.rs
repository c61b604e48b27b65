//! Fluent predicate builder and its compiled plan.
//!
//! A [`PredicateBuilder`] accumulates comparison terms joined by `and()`/`or()` and
//! compiles them into a [`CompiledPlan`]: standalone OR branches plus groups of AND'd
//! terms. Each branch becomes one independent store query.
//!
//! ```ignore
//! use docset::predicate::PredicateBuilder;
//! use docset::field;
//!
//! // status == "active" OR (age >= 18 AND country == "NO")
//! let plan = PredicateBuilder::new()
//!     .equal("status", "active")
//!     .or()
//!     .greater_than_equal(field!(|u: User| u.age), 18)
//!     .and()
//!     .equal("country", "NO")
//!     .compile()?;
//!
//! assert_eq!(plan.or_branches.len(), 1);
//! assert_eq!(plan.and_groups.len(), 1);
//! ```

use bson::Bson;

use crate::{
    error::{DocSetError, DocSetResult},
    query::FieldOp,
};

/// Combinator state of the builder, also recorded on each term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupState {
    #[default]
    Start,
    And,
    Or,
    Done,
}

/// Names the document field a term compares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelector {
    /// A document field name, used as is.
    Name(String),
    /// Source text of a typed accessor such as `|u| u.name`.
    Accessor(String),
}

impl FieldSelector {
    pub fn accessor(source: impl Into<String>) -> Self {
        FieldSelector::Accessor(source.into())
    }

    /// Resolves the document field name.
    ///
    /// An accessor must reduce to `receiver.field`; the first character of `field`
    /// is lower-cased.
    pub fn resolve(&self) -> DocSetResult<String> {
        match self {
            FieldSelector::Name(name) => Ok(name.clone()),
            FieldSelector::Accessor(source) => extract_field(source),
        }
    }
}

impl From<&str> for FieldSelector {
    fn from(name: &str) -> Self {
        FieldSelector::Name(name.to_string())
    }
}

impl From<String> for FieldSelector {
    fn from(name: String) -> Self {
        FieldSelector::Name(name)
    }
}

fn extract_field(source: &str) -> DocSetResult<String> {
    let compact: String = source
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ';' | '{' | '}'))
        .collect();

    let body = match compact.rsplit_once("=>") {
        Some((_, body)) => body,
        None => match compact.strip_prefix('|').and_then(|rest| rest.split_once('|')) {
            Some((_, body)) => body,
            None => compact.as_str(),
        },
    };
    let body = body.strip_prefix("return").unwrap_or(body);

    let segments: Vec<&str> = body.split('.').collect();

    match segments.as_slice() {
        [receiver, field] if !receiver.is_empty() && !field.is_empty() => Ok(lowercase_first(field)),
        _ => Err(DocSetError::CannotExtractField(source.to_string())),
    }
}

fn lowercase_first(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Builds a [`FieldSelector`] from a typed accessor closure.
///
/// With a type annotation the field access is checked at compile time.
///
/// ```ignore
/// let selector = field!(|u: User| u.email);
/// let unchecked = field!(|u| u.email);
/// ```
#[macro_export]
macro_rules! field {
    (|$param:ident : $ty:ty| $($body:tt)+) => {{
        let _ = |$param: &$ty| {
            let _ = &$($body)+;
        };
        $crate::predicate::FieldSelector::accessor(stringify!(|$param| $($body)+))
    }};
    (|$param:ident| $($body:tt)+) => {
        $crate::predicate::FieldSelector::accessor(stringify!(|$param| $($body)+))
    };
}

/// A single comparison, in builder-call order.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub field: String,
    pub op: FieldOp,
    pub value: Bson,
    pub group_state: GroupState,
    /// Position of the term in the builder chain.
    pub index: usize,
    starts_group: bool,
}

/// Terms joined by AND.
#[derive(Debug, Clone, PartialEq)]
pub struct TermGroup {
    pub terms: Vec<Term>,
}

/// One independently executable branch of a plan.
#[derive(Debug, Clone, Copy)]
pub struct Branch<'a> {
    pub terms: &'a [Term],
    /// `true` for an AND group, `false` for a standalone OR term.
    pub grouped: bool,
}

impl Branch<'_> {
    fn first_index(&self) -> usize {
        self.terms.first().map(|term| term.index).unwrap_or(usize::MAX)
    }
}

/// Normalized disjunction of AND groups and standalone OR terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledPlan {
    pub or_branches: Vec<Term>,
    pub and_groups: Vec<TermGroup>,
}

impl CompiledPlan {
    /// Every branch, ordered by the position of its first term.
    pub fn branches(&self) -> Vec<Branch<'_>> {
        let mut branches: Vec<Branch<'_>> = self
            .and_groups
            .iter()
            .map(|group| Branch { terms: &group.terms, grouped: true })
            .chain(self.or_branches.iter().map(|term| Branch {
                terms: std::slice::from_ref(term),
                grouped: false,
            }))
            .collect();

        branches.sort_by_key(Branch::first_index);
        branches
    }

    pub fn len(&self) -> usize {
        self.or_branches.len() + self.and_groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
enum Fault {
    InvalidState,
    CannotExtractField(String),
}

impl From<Fault> for DocSetError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::InvalidState => DocSetError::InvalidExpressionState,
            Fault::CannotExtractField(source) => DocSetError::CannotExtractField(source),
        }
    }
}

/// Stateful fluent builder of predicate plans.
///
/// Every term but the first must be preceded by [`and`](Self::and) or
/// [`or`](Self::or). Mistakes are recorded and reported by [`compile`](Self::compile).
#[derive(Debug, Clone, Default)]
pub struct PredicateBuilder {
    state: GroupState,
    terms: Vec<Term>,
    fault: Option<Fault>,
}

impl PredicateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equal(self, field: impl Into<FieldSelector>, value: impl Into<Bson>) -> Self {
        self.push(field.into(), FieldOp::Eq, value.into())
    }

    pub fn not_equal(self, field: impl Into<FieldSelector>, value: impl Into<Bson>) -> Self {
        self.push(field.into(), FieldOp::Ne, value.into())
    }

    pub fn greater_than(self, field: impl Into<FieldSelector>, value: impl Into<Bson>) -> Self {
        self.push(field.into(), FieldOp::Gt, value.into())
    }

    pub fn less_than(self, field: impl Into<FieldSelector>, value: impl Into<Bson>) -> Self {
        self.push(field.into(), FieldOp::Lt, value.into())
    }

    pub fn greater_than_equal(self, field: impl Into<FieldSelector>, value: impl Into<Bson>) -> Self {
        self.push(field.into(), FieldOp::Gte, value.into())
    }

    pub fn less_than_equal(self, field: impl Into<FieldSelector>, value: impl Into<Bson>) -> Self {
        self.push(field.into(), FieldOp::Lte, value.into())
    }

    /// Joins the next term to the current group.
    pub fn and(mut self) -> Self {
        if !self.terms.is_empty() {
            self.state = GroupState::And;
        }
        self
    }

    /// Starts an alternative: a standalone term, or a new group when more terms follow.
    pub fn or(mut self) -> Self {
        if !self.terms.is_empty() {
            self.state = GroupState::Or;
        }
        self
    }

    /// Number of terms added so far.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn push(mut self, selector: FieldSelector, op: FieldOp, value: Bson) -> Self {
        if self.state == GroupState::Done {
            self.fault.get_or_insert(Fault::InvalidState);
            return self;
        }

        let field = match selector.resolve() {
            Ok(field) => field,
            Err(_) => {
                let source = match selector {
                    FieldSelector::Name(name) | FieldSelector::Accessor(name) => name,
                };
                self.fault.get_or_insert(Fault::CannotExtractField(source));
                self.state = GroupState::Done;
                return self;
            }
        };

        let starts_group = self.state == GroupState::Or;

        // only the latest of consecutive OR terms may open a group
        if starts_group {
            if let Some(last) = self.terms.last_mut() {
                last.starts_group = false;
            }
        }

        self.terms.push(Term {
            field,
            op,
            value,
            group_state: self.state,
            index: self.terms.len(),
            starts_group,
        });

        // the first term takes the combinator that joins it to the second
        if self.terms.len() == 2 {
            self.terms[0].group_state = self.state;
        }

        self.state = GroupState::Done;
        self
    }

    /// Compiles the accumulated terms.
    ///
    /// Fails with [`DocSetError::EmptyExpression`] when no term was added and with
    /// [`DocSetError::InvalidExpressionState`] when a combinator is left dangling.
    pub fn compile(self) -> DocSetResult<CompiledPlan> {
        if self.terms.is_empty() {
            return Err(DocSetError::EmptyExpression);
        }

        if let Some(fault) = self.fault {
            return Err(fault.into());
        }

        if self.state != GroupState::Done {
            return Err(DocSetError::InvalidExpressionState);
        }

        let mut plan = CompiledPlan::default();

        if self.terms.len() == 1 {
            plan.or_branches = self.terms;
            return Ok(plan);
        }

        let last = self.terms.len() - 1;
        let mut group: Vec<Term> = Vec::new();

        for (index, mut term) in self.terms.into_iter().enumerate() {
            match term.group_state {
                GroupState::And => group.push(term),
                GroupState::Or if term.starts_group && index < last => {
                    if !group.is_empty() {
                        plan.and_groups.push(TermGroup { terms: std::mem::take(&mut group) });
                    }
                    term.group_state = GroupState::And;
                    group.push(term);
                }
                _ => plan.or_branches.push(term),
            }
        }

        if !group.is_empty() {
            plan.and_groups.push(TermGroup { terms: group });
        }

        Ok(plan)
    }
}

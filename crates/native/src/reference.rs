//! Deterministic in-process engine implementing the entry-point table.
//!
//! `ReferenceEngine` exists so the safe layer can be exercised without a
//! system solver. It decides satisfiability by enumerating assignments, and
//! only answers `sat` or `unsat` when the enumeration settles the question:
//!
//! - `sat` when some assignment makes every assertion true;
//! - `unsat` when every free constant ranges over its whole domain (Bool,
//!   bitvectors of at most eight bits, or a constant pinned by a top-level
//!   equality with a literal) and no assignment satisfies the assertions;
//! - `undef` with reason `"incomplete search"` otherwise.
//!
//! Quantifiers follow the same rule: `forall` is true only when its bound
//! variables were enumerated in full, false on any counterexample, and
//! undetermined otherwise.
//!
//! What it models faithfully is the part the safe layer is responsible for:
//! reference counts on every object, out-of-band error state that is reset
//! at the start of each call, error-handler invocation, and freeing of
//! objects whose count returns to zero. Misuse is recorded in
//! [`EngineStats`] instead of crashing, and one-shot [`Fault`]s can be
//! injected to drive failure paths.

use std::cmp::Ordering;
use std::ffi::CStr;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::api::{ErrorCode, ErrorHandler, LBool, NativeApi, NativeError, SortKind};
use crate::handles::{RawAst, RawConfig, RawEngine, RawModel, RawOptimize, RawParams, RawSolver};

/// Upper bound on assignments tried by one check before answering `undef`.
const SEARCH_LIMIT: u64 = 200_000;

/// Half-width of the integer window always included in the candidate set.
const INT_WINDOW: i128 = 4;

/// Largest bitvector value always included in the candidate set.
const BV_WINDOW: u128 = 7;

/// Bitvectors up to this width are enumerated in full.
const FULL_BV_WIDTH: u32 = 8;

const INCOMPLETE: &str = "incomplete search";

/// Parameters the engine accepts, with the value shape each expects.
const KNOWN_PARAMS: &[(&str, ParamKind)] = &[
    ("auto_config", ParamKind::Bool),
    ("model", ParamKind::Bool),
    ("model_validate", ParamKind::Bool),
    ("proof", ParamKind::Bool),
    ("rlimit", ParamKind::Uint),
    ("smtlib2_compliant", ParamKind::Bool),
    ("timeout", ParamKind::Uint),
    ("trace", ParamKind::Bool),
    ("type_check", ParamKind::Bool),
    ("unsat_core", ParamKind::Bool),
    ("well_sorted_check", ParamKind::Bool),
];

#[derive(Debug, Clone, Copy)]
enum ParamKind {
    Bool,
    Uint,
}

fn validate_param(name: &str, value: &str) -> Result<(), NativeError> {
    let Some((_, kind)) = KNOWN_PARAMS.iter().find(|(n, _)| *n == name) else {
        return Err(fail(
            ErrorCode::INVALID_ARG,
            format!("unknown parameter '{name}'"),
        ));
    };
    let ok = match kind {
        ParamKind::Bool => matches!(value, "true" | "false"),
        ParamKind::Uint => value.parse::<u64>().is_ok(),
    };
    if ok {
        Ok(())
    } else {
        Err(fail(
            ErrorCode::INVALID_ARG,
            format!("invalid value '{value}' for parameter '{name}'"),
        ))
    }
}

fn fail(code: ErrorCode, message: impl Into<String>) -> NativeError {
    NativeError {
        code,
        message: message.into(),
    }
}

/// One-shot failure to inject into the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `mk_config` returns null.
    NullConfig,
    /// `mk_engine` returns null.
    NullEngine,
    /// `mk_solver` / `mk_simple_solver` return null.
    NullSolver,
    /// `mk_optimize` returns null.
    NullOptimize,
    /// `model_eval` refuses to evaluate.
    EvalRefused,
    /// The next check answers `undef`.
    CheckUnknown,
    /// The next `solver_set_params` rejects its parameter set.
    ParamsRejected,
}

/// Lifetime accounting across every engine hosted by one library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub configs_created: usize,
    pub configs_destroyed: usize,
    pub engines_created: usize,
    pub engines_destroyed: usize,
    /// Reference counts still held when their engine was destroyed.
    pub refs_leaked: usize,
    /// Decrements on objects whose count was already zero.
    pub dec_ref_underflows: usize,
    /// Calls that named an object after it had been freed.
    pub freed_handle_uses: usize,
    /// Destroy calls on configs or engines that no longer exist.
    pub invalid_destroys: usize,
    /// Calls that left a non-OK error code behind.
    pub errors_raised: usize,
    /// Times a registered error handler was invoked.
    pub handler_invocations: usize,
}

/// Rational number in lowest terms with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Rational {
    num: i128,
    den: i128,
}

impl Rational {
    fn new(num: i128, den: i128) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()).max(1) as i128;
        let sign = if den < 0 { -1 } else { 1 };
        Some(Self {
            num: sign * num / g,
            den: sign * den / g,
        })
    }

    fn integer(n: i128) -> Self {
        Self { num: n, den: 1 }
    }

    fn checked_add(self, other: Self) -> Option<Self> {
        let num = self
            .num
            .checked_mul(other.den)?
            .checked_add(other.num.checked_mul(self.den)?)?;
        Self::new(num, self.den.checked_mul(other.den)?)
    }

    fn compare(self, other: Self) -> Option<Ordering> {
        let lhs = self.num.checked_mul(other.den)?;
        let rhs = other.num.checked_mul(self.den)?;
        Some(lhs.cmp(&rhs))
    }

    fn parse(text: &str) -> Option<Self> {
        if let Some((n, d)) = text.split_once('/') {
            return Self::new(n.trim().parse().ok()?, d.trim().parse().ok()?);
        }
        if let Some((int, frac)) = text.split_once('.') {
            let negative = int.starts_with('-');
            let digits = format!("{}{}", int.trim_start_matches('-'), frac);
            let magnitude: i128 = digits.parse().ok()?;
            let den = 10i128.checked_pow(u32::try_from(frac.len()).ok()?)?;
            return Self::new(if negative { -magnitude } else { magnitude }, den);
        }
        text.parse().ok().map(Self::integer)
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn bv_mask(width: u32) -> u128 {
    if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SortKey {
    Bool,
    Int,
    Real,
    Bv(u32),
}

impl SortKey {
    fn kind(self) -> SortKind {
        match self {
            SortKey::Bool => SortKind::Bool,
            SortKey::Int => SortKind::Int,
            SortKey::Real => SortKind::Real,
            SortKey::Bv(_) => SortKind::BitVec,
        }
    }

    /// The candidate set covers every value of the sort.
    fn is_finite(self) -> bool {
        match self {
            SortKey::Bool => true,
            SortKey::Bv(width) => width <= FULL_BV_WIDTH,
            SortKey::Int | SortKey::Real => false,
        }
    }

    fn default_value(self) -> Value {
        match self {
            SortKey::Bool => Value::Bool(false),
            SortKey::Int => Value::Int(0),
            SortKey::Real => Value::Real(Rational::integer(0)),
            SortKey::Bv(width) => Value::Bv { bits: 0, width },
        }
    }

    fn render(self) -> String {
        match self {
            SortKey::Bool => "Bool".to_string(),
            SortKey::Int => "Int".to_string(),
            SortKey::Real => "Real".to_string(),
            SortKey::Bv(width) => format!("(_ BitVec {width})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Value {
    Bool(bool),
    Int(i128),
    Real(Rational),
    Bv { bits: u128, width: u32 },
}

impl Value {
    fn sort(&self) -> SortKey {
        match self {
            Value::Bool(_) => SortKey::Bool,
            Value::Int(_) => SortKey::Int,
            Value::Real(_) => SortKey::Real,
            Value::Bv { width, .. } => SortKey::Bv(*width),
        }
    }

    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Real(a), Value::Real(b)) => a.compare(*b),
            (Value::Bv { bits: a, .. }, Value::Bv { bits: b, .. }) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Value::Bool(b) => b.to_string(),
            Value::Int(n) if *n < 0 => format!("(- {})", n.unsigned_abs()),
            Value::Int(n) => n.to_string(),
            Value::Real(r) if r.den == 1 && r.num < 0 => format!("(- {}.0)", r.num.unsigned_abs()),
            Value::Real(r) if r.den == 1 => format!("{}.0", r.num),
            Value::Real(r) if r.num < 0 => format!("(- (/ {} {}))", r.num.unsigned_abs(), r.den),
            Value::Real(r) => format!("(/ {} {})", r.num, r.den),
            Value::Bv { bits, width } if width % 4 == 0 => {
                format!("#x{:0>digits$x}", bits, digits = (*width / 4) as usize)
            }
            Value::Bv { bits, width } => {
                format!("#b{:0>digits$b}", bits, digits = *width as usize)
            }
        }
    }

    fn numeral(&self) -> Option<String> {
        match self {
            Value::Bool(_) => None,
            Value::Int(n) => Some(n.to_string()),
            Value::Real(r) if r.den == 1 => Some(r.num.to_string()),
            Value::Real(r) => Some(format!("{}/{}", r.num, r.den)),
            Value::Bv { bits, .. } => Some(bits.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Eq,
    Not,
    And,
    Or,
    Add,
    Le,
    Lt,
    Ge,
    BvAdd,
    BvUlt,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Add => "+",
            Op::Le => "<=",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::BvAdd => "bvadd",
            Op::BvUlt => "bvult",
        }
    }

    /// Strict application. Connectives are evaluated by [`Evaluator`].
    fn apply(self, args: &[Value]) -> Option<Value> {
        let value = match (self, args) {
            (Op::Eq, [a, b]) => Value::Bool(a == b),
            (Op::Not, [Value::Bool(b)]) => Value::Bool(!b),
            (Op::Add, [Value::Int(_), ..]) => {
                let mut sum: i128 = 0;
                for arg in args {
                    let Value::Int(n) = arg else { return None };
                    sum = sum.checked_add(*n)?;
                }
                Value::Int(sum)
            }
            (Op::Add, [Value::Real(_), ..]) => {
                let mut sum = Rational::integer(0);
                for arg in args {
                    let Value::Real(r) = arg else { return None };
                    sum = sum.checked_add(*r)?;
                }
                Value::Real(sum)
            }
            (Op::Le, [a, b]) => Value::Bool(a.compare(b)? != Ordering::Greater),
            (Op::Lt, [a, b]) => Value::Bool(a.compare(b)? == Ordering::Less),
            (Op::Ge, [a, b]) => Value::Bool(a.compare(b)? != Ordering::Less),
            (
                Op::BvAdd,
                [
                    Value::Bv { bits: a, width },
                    Value::Bv { bits: b, .. },
                ],
            ) => Value::Bv {
                bits: a.wrapping_add(*b) & bv_mask(*width),
                width: *width,
            },
            (Op::BvUlt, [Value::Bv { bits: a, .. }, Value::Bv { bits: b, .. }]) => {
                Value::Bool(a < b)
            }
            _ => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Term {
    Sort(SortKey),
    Const(String, SortKey),
    Lit(Value),
    App(Op, Vec<usize>),
    Forall(Vec<usize>, usize),
}

#[derive(Debug)]
struct Node {
    term: Term,
    /// `None` for sort nodes.
    sort: Option<SortKey>,
    rc: usize,
    /// Count went back to zero after being held.
    released: bool,
}

#[derive(Debug, Clone, Copy)]
struct Objective {
    term: usize,
    maximize: bool,
}

#[derive(Debug, Clone)]
struct Outcome {
    result: LBool,
    assignment: FxHashMap<usize, Value>,
    optimum: Vec<Value>,
    reason: String,
}

/// Shared state of solvers and optimizers.
///
/// The last outcome survives assertions and scope changes, as the real
/// engine's does, and is cleared only by `reset` or the next check.
#[derive(Debug)]
struct Checker {
    rc: usize,
    held: bool,
    simple: bool,
    frames: Vec<Vec<usize>>,
    objectives: Vec<Objective>,
    last: Option<Outcome>,
    timeout_ms: Option<u32>,
}

impl Checker {
    fn new(simple: bool) -> Self {
        Self {
            rc: 0,
            held: false,
            simple,
            frames: vec![Vec::new()],
            objectives: Vec::new(),
            last: None,
            timeout_ms: None,
        }
    }

    fn assertions(&self) -> Vec<usize> {
        self.frames.iter().flatten().copied().collect()
    }

    fn scopes(&self) -> u32 {
        (self.frames.len() - 1) as u32
    }
}

#[derive(Debug)]
struct ModelState {
    rc: usize,
    held: bool,
    assignment: FxHashMap<usize, Value>,
}

#[derive(Debug)]
struct ParamSet {
    rc: usize,
    held: bool,
    values: Vec<(String, u32)>,
}

#[derive(Debug, Default)]
struct EngineState {
    params: FxHashMap<String, String>,
    nodes: FxHashMap<usize, Node>,
    interned: FxHashMap<Term, usize>,
    solvers: FxHashMap<usize, Checker>,
    optimizers: FxHashMap<usize, Checker>,
    models: FxHashMap<usize, ModelState>,
    param_sets: FxHashMap<usize, ParamSet>,
    error: Option<NativeError>,
    handler: Option<ErrorHandler>,
}

impl EngineState {
    fn held_refs(&self) -> usize {
        self.nodes.values().map(|n| n.rc).sum::<usize>()
            + self.solvers.values().map(|s| s.rc).sum::<usize>()
            + self.optimizers.values().map(|o| o.rc).sum::<usize>()
            + self.models.values().map(|m| m.rc).sum::<usize>()
            + self.param_sets.values().map(|p| p.rc).sum::<usize>()
    }
}

#[derive(Debug, Default)]
struct Library {
    next_id: usize,
    configs: FxHashMap<usize, Vec<(String, String)>>,
    engines: FxHashMap<usize, EngineState>,
    faults: Vec<Fault>,
    stats: EngineStats,
}

impl Library {
    fn fresh_id(&mut self) -> usize {
        self.next_id += 1;
        // Keep handles clear of the null sentinel and visibly pointer-like.
        0x1000 + self.next_id * 8
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Borrowed view of one engine plus the library-wide bookkeeping.
struct Session<'a> {
    state: &'a mut EngineState,
    next_id: &'a mut usize,
    faults: &'a mut Vec<Fault>,
    stats: &'a mut EngineStats,
}

impl Session<'_> {
    fn fresh_id(&mut self) -> usize {
        *self.next_id += 1;
        0x1000 + *self.next_id * 8
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(index) => {
                self.faults.remove(index);
                true
            }
            None => false,
        }
    }

    fn intern(&mut self, term: Term, sort: Option<SortKey>) -> RawAst {
        if let Some(&id) = self.state.interned.get(&term) {
            if let Some(node) = self.state.nodes.get_mut(&id) {
                node.released = false;
            }
            return RawAst::from_id(id);
        }
        let id = self.fresh_id();
        self.state.interned.insert(term.clone(), id);
        self.state.nodes.insert(
            id,
            Node {
                term,
                sort,
                rc: 0,
                released: false,
            },
        );
        RawAst::from_id(id)
    }

    fn intern_value(&mut self, value: Value) -> RawAst {
        let sort = value.sort();
        self.intern(Term::Lit(value), Some(sort))
    }

    fn node(&mut self, ast: RawAst) -> Result<(Term, Option<SortKey>), NativeError> {
        let node = self
            .state
            .nodes
            .get(&ast.id())
            .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "invalid AST handle"))?;
        if node.released && node.rc == 0 {
            self.stats.freed_handle_uses += 1;
        }
        Ok((node.term.clone(), node.sort))
    }

    fn expr_sort(&mut self, ast: RawAst) -> Result<SortKey, NativeError> {
        match self.node(ast)? {
            (_, Some(sort)) => Ok(sort),
            (_, None) => Err(fail(ErrorCode::SORT_ERROR, "expected an expression, got a sort")),
        }
    }

    fn sort_node(&mut self, ast: RawAst) -> Result<SortKey, NativeError> {
        match self.node(ast)? {
            (Term::Sort(key), _) => Ok(key),
            _ => Err(fail(ErrorCode::SORT_ERROR, "expected a sort")),
        }
    }

    fn app(&mut self, op: Op, args: &[RawAst], result: SortKey) -> RawAst {
        let ids = args.iter().map(|a| a.id()).collect();
        self.intern(Term::App(op, ids), Some(result))
    }

    fn same_sort(&mut self, lhs: RawAst, rhs: RawAst) -> Result<SortKey, NativeError> {
        let l = self.expr_sort(lhs)?;
        let r = self.expr_sort(rhs)?;
        if l != r {
            return Err(fail(
                ErrorCode::SORT_ERROR,
                format!("sort mismatch: {} vs {}", l.render(), r.render()),
            ));
        }
        Ok(l)
    }

    fn all_sort(&mut self, args: &[RawAst], pred: fn(SortKey) -> bool) -> Result<SortKey, NativeError> {
        let mut first = None;
        for arg in args {
            let sort = self.expr_sort(*arg)?;
            if !pred(sort) || first.is_some_and(|f| f != sort) {
                return Err(fail(ErrorCode::SORT_ERROR, "argument sort mismatch"));
            }
            first = Some(sort);
        }
        first.ok_or_else(|| fail(ErrorCode::INVALID_ARG, "operator needs at least one argument"))
    }

    fn compare(&mut self, op: Op, lhs: RawAst, rhs: RawAst) -> Result<RawAst, NativeError> {
        let sort = self.same_sort(lhs, rhs)?;
        if !matches!(sort, SortKey::Int | SortKey::Real) {
            return Err(fail(ErrorCode::SORT_ERROR, "arithmetic comparison needs Int or Real"));
        }
        Ok(self.app(op, &[lhs, rhs], SortKey::Bool))
    }

    fn bv_binary(&mut self, op: Op, lhs: RawAst, rhs: RawAst, bool_result: bool) -> Result<RawAst, NativeError> {
        let sort = self.same_sort(lhs, rhs)?;
        if !matches!(sort, SortKey::Bv(_)) {
            return Err(fail(ErrorCode::SORT_ERROR, "bitvector operands expected"));
        }
        let result = if bool_result { SortKey::Bool } else { sort };
        Ok(self.app(op, &[lhs, rhs], result))
    }

    fn checker(&mut self, table: Table, id: usize) -> Result<&mut Checker, NativeError> {
        let map = match table {
            Table::Solver => &mut self.state.solvers,
            Table::Optimize => &mut self.state.optimizers,
        };
        map.get_mut(&id).ok_or_else(|| {
            self.stats.freed_handle_uses += 1;
            fail(ErrorCode::INVALID_ARG, "invalid or freed solver handle")
        })
    }

    fn assert_into(&mut self, table: Table, id: usize, constraint: RawAst) -> Result<(), NativeError> {
        if self.expr_sort(constraint)? != SortKey::Bool {
            return Err(fail(ErrorCode::SORT_ERROR, "assertion must be Boolean"));
        }
        let checker = self.checker(table, id)?;
        if let Some(frame) = checker.frames.last_mut() {
            frame.push(constraint.id());
        }
        Ok(())
    }

    fn run_check(&mut self, table: Table, id: usize) -> Result<LBool, NativeError> {
        let unknown = self.take_fault(Fault::CheckUnknown);
        let (assertions, objectives) = {
            let checker = self.checker(table, id)?;
            (checker.assertions(), checker.objectives.clone())
        };
        let outcome = if unknown {
            undecided("canceled")
        } else {
            search(&self.state.nodes, &assertions, &objectives)
        };
        let result = outcome.result;
        self.checker(table, id)?.last = Some(outcome);
        Ok(result)
    }

    fn model_from(&mut self, table: Table, id: usize) -> Result<RawModel, NativeError> {
        let assignment = match &self.checker(table, id)?.last {
            Some(outcome) if outcome.result == LBool::True => outcome.assignment.clone(),
            _ => return Err(fail(ErrorCode::INVALID_USAGE, "there is no current model")),
        };
        let model_id = self.fresh_id();
        self.state.models.insert(
            model_id,
            ModelState {
                rc: 0,
                held: false,
                assignment,
            },
        );
        Ok(RawModel::from_id(model_id))
    }

    fn render(&self, id: usize) -> String {
        let Some(node) = self.state.nodes.get(&id) else {
            return "<invalid>".to_string();
        };
        match &node.term {
            Term::Sort(key) => key.render(),
            Term::Const(name, _) => name.clone(),
            Term::Lit(value) => value.render(),
            Term::App(op, args) => {
                let mut out = format!("({}", op.symbol());
                for arg in args {
                    out.push(' ');
                    out.push_str(&self.render(*arg));
                }
                out.push(')');
                out
            }
            Term::Forall(bound, body) => {
                let mut out = "(forall (".to_string();
                for (i, b) in bound.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    let sort = self.state.nodes.get(b).and_then(|n| n.sort);
                    let sort = sort.map(SortKey::render).unwrap_or_default();
                    let _ = write!(out, "({} {})", self.render(*b), sort);
                }
                let _ = write!(out, ") {})", self.render(*body));
                out
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Table {
    Solver,
    Optimize,
}

/// Free constants, numerals and sorts reachable from a set of roots.
#[derive(Default)]
struct Footprint {
    free: Vec<usize>,
    numerals: Vec<Value>,
    sorts: Vec<SortKey>,
}

impl Footprint {
    fn collect(nodes: &FxHashMap<usize, Node>, roots: &[usize]) -> Self {
        let mut fp = Footprint::default();
        let mut bound = Vec::new();
        for root in roots {
            fp.walk(nodes, *root, &mut bound);
        }
        fp
    }

    fn walk(&mut self, nodes: &FxHashMap<usize, Node>, id: usize, bound: &mut Vec<usize>) {
        let Some(node) = nodes.get(&id) else { return };
        match &node.term {
            Term::Sort(_) => {}
            Term::Const(_, sort) => {
                if !self.sorts.contains(sort) {
                    self.sorts.push(*sort);
                }
                if !bound.contains(&id) && !self.free.contains(&id) {
                    self.free.push(id);
                }
            }
            Term::Lit(value) => {
                if !self.numerals.contains(value) {
                    self.numerals.push(value.clone());
                }
            }
            Term::App(_, args) => {
                for arg in args {
                    self.walk(nodes, *arg, bound);
                }
            }
            Term::Forall(vars, body) => {
                let depth = bound.len();
                bound.extend(vars.iter().copied());
                for var in vars {
                    self.walk(nodes, *var, bound);
                }
                self.walk(nodes, *body, bound);
                bound.truncate(depth);
            }
        }
    }

    fn candidates(&self) -> FxHashMap<SortKey, Vec<Value>> {
        let mut out: FxHashMap<SortKey, Vec<Value>> = FxHashMap::default();
        for sort in &self.sorts {
            let mut values = Vec::new();
            let mut push = |v: Value| {
                if !values.contains(&v) {
                    values.push(v);
                }
            };
            match *sort {
                SortKey::Bool => {
                    push(Value::Bool(false));
                    push(Value::Bool(true));
                }
                SortKey::Int => {
                    for n in -INT_WINDOW..=INT_WINDOW {
                        push(Value::Int(n));
                    }
                    for numeral in &self.numerals {
                        if let Value::Int(n) = numeral {
                            for m in [n.checked_sub(1), Some(*n), n.checked_add(1)].into_iter().flatten() {
                                push(Value::Int(m));
                            }
                        }
                    }
                }
                SortKey::Real => {
                    for n in -1..=1 {
                        push(Value::Real(Rational::integer(n)));
                    }
                    for numeral in &self.numerals {
                        if let Value::Real(r) = numeral {
                            for delta in [-1, 0, 1] {
                                if let Some(v) = r.checked_add(Rational::integer(delta)) {
                                    push(Value::Real(v));
                                }
                            }
                        }
                    }
                }
                SortKey::Bv(width) if sort.is_finite() => {
                    for bits in 0..=bv_mask(width) {
                        push(Value::Bv { bits, width });
                    }
                }
                SortKey::Bv(width) => {
                    let mask = bv_mask(width);
                    for bits in 0..=BV_WINDOW.min(mask) {
                        push(Value::Bv { bits, width });
                    }
                    for numeral in &self.numerals {
                        match numeral {
                            Value::Bv { bits, width: w } if *w == width => {
                                for v in [bits.wrapping_sub(1), *bits, bits.wrapping_add(1)] {
                                    push(Value::Bv { bits: v & mask, width });
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            out.insert(*sort, values);
        }
        out
    }
}

/// Three-valued evaluation: `None` means the value could not be settled.
struct Evaluator<'a> {
    nodes: &'a FxHashMap<usize, Node>,
    candidates: FxHashMap<SortKey, Vec<Value>>,
    completion: bool,
}

impl Evaluator<'_> {
    fn eval(&self, id: usize, env: &mut FxHashMap<usize, Value>) -> Option<Value> {
        let node = self.nodes.get(&id)?;
        match &node.term {
            Term::Sort(_) => None,
            Term::Lit(value) => Some(value.clone()),
            Term::Const(_, sort) => match env.get(&id) {
                Some(value) => Some(value.clone()),
                None if self.completion => Some(sort.default_value()),
                None => None,
            },
            Term::App(Op::And, args) => self.connective(args, false, env).map(Value::Bool),
            Term::App(Op::Or, args) => self.connective(args, true, env).map(Value::Bool),
            Term::App(op, args) => {
                let values: Option<Vec<Value>> = args.iter().map(|a| self.eval(*a, env)).collect();
                op.apply(&values?)
            }
            Term::Forall(bound, body) => self.forall(bound, *body, env).map(Value::Bool),
        }
    }

    /// Conjunction (`dominant == false`) or disjunction (`dominant == true`).
    ///
    /// One operand equal to `dominant` decides the result even when others
    /// are undetermined.
    fn connective(
        &self,
        args: &[usize],
        dominant: bool,
        env: &mut FxHashMap<usize, Value>,
    ) -> Option<bool> {
        let mut settled = true;
        for arg in args {
            match self.eval(*arg, env) {
                Some(Value::Bool(b)) if b == dominant => return Some(dominant),
                Some(Value::Bool(_)) => {}
                _ => settled = false,
            }
        }
        settled.then_some(!dominant)
    }

    fn forall(&self, bound: &[usize], body: usize, env: &mut FxHashMap<usize, Value>) -> Option<bool> {
        let Some((&var, rest)) = bound.split_first() else {
            return match self.eval(body, env)? {
                Value::Bool(b) => Some(b),
                _ => None,
            };
        };
        let sort = self.nodes.get(&var)?.sort?;
        let values = self.candidates.get(&sort)?;
        let saved = env.remove(&var);
        let mut verdict = Some(true);
        for value in values {
            env.insert(var, value.clone());
            match self.forall(rest, body, env) {
                Some(true) => {}
                Some(false) => {
                    verdict = Some(false);
                    break;
                }
                None => verdict = None,
            }
        }
        env.remove(&var);
        if let Some(previous) = saved {
            env.insert(var, previous);
        }
        match verdict {
            // A sample of an infinite sort proves nothing universal.
            Some(true) if !sort.is_finite() => None,
            other => other,
        }
    }
}

/// Constants fixed by a top-level `(= c lit)` conjunct, first one wins.
///
/// Every model must satisfy that conjunct, so searching `c` over the single
/// literal loses no solutions.
fn pinned(nodes: &FxHashMap<usize, Node>, assertions: &[usize]) -> FxHashMap<usize, Value> {
    let mut pins = FxHashMap::default();
    let mut pending = assertions.to_vec();
    while let Some(id) = pending.pop() {
        let Some(node) = nodes.get(&id) else { continue };
        match &node.term {
            Term::App(Op::And, args) => pending.extend(args.iter().copied()),
            Term::App(Op::Eq, args) if args.len() == 2 => {
                let term = |i: usize| nodes.get(&args[i]).map(|n| &n.term);
                let pin = match (term(0), term(1)) {
                    (Some(Term::Const(..)), Some(Term::Lit(v))) => Some((args[0], v)),
                    (Some(Term::Lit(v)), Some(Term::Const(..))) => Some((args[1], v)),
                    _ => None,
                };
                if let Some((c, v)) = pin {
                    pins.entry(c).or_insert_with(|| v.clone());
                }
            }
            _ => {}
        }
    }
    pins
}

fn undecided(reason: &str) -> Outcome {
    Outcome {
        result: LBool::Undef,
        assignment: FxHashMap::default(),
        optimum: Vec::new(),
        reason: reason.to_string(),
    }
}

/// Enumeration over candidate assignments.
fn search(nodes: &FxHashMap<usize, Node>, assertions: &[usize], objectives: &[Objective]) -> Outcome {
    let mut roots = assertions.to_vec();
    roots.extend(objectives.iter().map(|o| o.term));
    let footprint = Footprint::collect(nodes, &roots);
    let evaluator = Evaluator {
        nodes,
        candidates: footprint.candidates(),
        completion: true,
    };

    let pins = pinned(nodes, assertions);
    let mut exhaustive = true;
    let mut domains: Vec<Vec<Value>> = Vec::with_capacity(footprint.free.len());
    for id in &footprint.free {
        if let Some(value) = pins.get(id) {
            domains.push(vec![value.clone()]);
            continue;
        }
        let sort = nodes.get(id).and_then(|n| n.sort);
        exhaustive &= sort.is_some_and(SortKey::is_finite);
        domains.push(
            sort.and_then(|s| evaluator.candidates.get(&s))
                .cloned()
                .unwrap_or_default(),
        );
    }
    let space = domains
        .iter()
        .fold(1u64, |acc, d| acc.saturating_mul(d.len() as u64));
    if space > SEARCH_LIMIT {
        return undecided("search space exceeded");
    }

    let mut best: Option<(FxHashMap<usize, Value>, Vec<Value>)> = None;
    // Some assignment neither satisfied nor refuted the assertions.
    let mut undetermined = false;
    let mut cursor = vec![0usize; domains.len()];
    let mut env = FxHashMap::default();
    'search: for _ in 0..space {
        env.clear();
        for (slot, id) in footprint.free.iter().enumerate() {
            env.insert(*id, domains[slot][cursor[slot]].clone());
        }
        match evaluator.connective(assertions, false, &mut env) {
            Some(true) if objectives.is_empty() => {
                best = Some((env.clone(), Vec::new()));
                break 'search;
            }
            Some(true) => {
                let scores: Option<Vec<Value>> = objectives
                    .iter()
                    .map(|o| evaluator.eval(o.term, &mut env))
                    .collect();
                match scores {
                    Some(scores) => {
                        let better = match &best {
                            Some((_, current)) => improves(objectives, &scores, current),
                            None => true,
                        };
                        if better {
                            best = Some((env.clone(), scores));
                        }
                    }
                    None => undetermined = true,
                }
            }
            Some(false) => {}
            None => undetermined = true,
        }
        // Odometer increment.
        for slot in (0..cursor.len()).rev() {
            cursor[slot] += 1;
            if cursor[slot] < domains[slot].len() {
                continue 'search;
            }
            cursor[slot] = 0;
        }
    }

    // An optimum or a refutation needs every assignment to have been settled.
    let settled = exhaustive && !undetermined;
    match best {
        Some((assignment, optimum)) if objectives.is_empty() || settled => Outcome {
            result: LBool::True,
            assignment,
            optimum,
            reason: String::new(),
        },
        None if settled => Outcome {
            result: LBool::False,
            assignment: FxHashMap::default(),
            optimum: Vec::new(),
            reason: String::new(),
        },
        _ => undecided(INCOMPLETE),
    }
}

/// Lexicographic comparison, first objective has priority.
fn improves(objectives: &[Objective], candidate: &[Value], current: &[Value]) -> bool {
    for ((objective, new), old) in objectives.iter().zip(candidate).zip(current) {
        match new.compare(old) {
            Some(Ordering::Greater) => return objective.maximize,
            Some(Ordering::Less) => return !objective.maximize,
            _ => {}
        }
    }
    false
}

/// In-process engine with reference-count accounting and fault injection.
#[derive(Debug, Default)]
pub struct ReferenceEngine {
    lib: Mutex<Library>,
}

impl ReferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Library> {
        self.lib.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm a one-shot fault for the next matching call.
    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    pub fn stats(&self) -> EngineStats {
        self.lock().stats.clone()
    }

    pub fn live_engines(&self) -> usize {
        self.lock().engines.len()
    }

    pub fn live_configs(&self) -> usize {
        self.lock().configs.len()
    }

    /// Sum of every reference count held on objects of live engines.
    pub fn outstanding_refs(&self) -> usize {
        self.lock().engines.values().map(EngineState::held_refs).sum()
    }

    /// Current reference count of one AST node, if it exists.
    pub fn ast_ref_count(&self, engine: RawEngine, ast: RawAst) -> Option<usize> {
        let lib = self.lock();
        lib.engines.get(&engine.id())?.nodes.get(&ast.id()).map(|n| n.rc)
    }

    /// Value a parameter was last set to on `engine`.
    pub fn param(&self, engine: RawEngine, name: &str) -> Option<String> {
        let lib = self.lock();
        lib.engines.get(&engine.id())?.params.get(name).cloned()
    }

    /// Whether the solver was created as a simple (non-incremental-tactic) solver.
    pub fn is_simple_solver(&self, engine: RawEngine, solver: RawSolver) -> Option<bool> {
        let lib = self.lock();
        lib.engines
            .get(&engine.id())?
            .solvers
            .get(&solver.id())
            .map(|s| s.simple)
    }

    pub fn solver_timeout(&self, engine: RawEngine, solver: RawSolver) -> Option<u32> {
        let lib = self.lock();
        lib.engines
            .get(&engine.id())?
            .solvers
            .get(&solver.id())?
            .timeout_ms
    }

    /// Run `op` against one engine, recording failures in its error state.
    ///
    /// The error code is reset on entry, as the real engine does. A failing
    /// call invokes the registered handler after the lock is released.
    fn with_engine<T>(
        &self,
        engine: RawEngine,
        fallback: T,
        op: impl FnOnce(&mut Session<'_>) -> Result<T, NativeError>,
    ) -> T {
        let notify = {
            let mut guard = self.lock();
            let lib = &mut *guard;
            let Some(state) = lib.engines.get_mut(&engine.id()) else {
                lib.stats.freed_handle_uses += 1;
                return fallback;
            };
            state.error = None;
            let mut session = Session {
                state,
                next_id: &mut lib.next_id,
                faults: &mut lib.faults,
                stats: &mut lib.stats,
            };
            match op(&mut session) {
                Ok(value) => return value,
                Err(error) => {
                    let code = error.code;
                    let handler = session.state.handler;
                    session.state.error = Some(error);
                    session.stats.errors_raised += 1;
                    if handler.is_some() {
                        session.stats.handler_invocations += 1;
                    }
                    handler.map(|h| (h, code))
                }
            }
        };
        if let Some((handler, code)) = notify {
            // SAFETY: the handler was registered through `set_error_handler`
            // and is invoked with the engine it was registered on.
            unsafe { handler(engine, code.0) };
        }
        fallback
    }

    fn retain<F>(&self, engine: RawEngine, id: usize, pick: F)
    where
        F: FnOnce(&mut EngineState) -> Option<(&mut usize, &mut bool)>,
    {
        self.with_engine(engine, (), |s| {
            let (rc, held) = pick(s.state).ok_or_else(|| {
                s.stats.freed_handle_uses += 1;
                fail(ErrorCode::INVALID_ARG, format!("invalid handle {id:#x}"))
            })?;
            *rc += 1;
            *held = true;
            Ok(())
        })
    }
}

impl NativeApi for ReferenceEngine {
    fn name(&self) -> &'static str {
        "reference"
    }

    unsafe fn mk_config(&self) -> RawConfig {
        let mut lib = self.lock();
        if lib.take_fault(Fault::NullConfig) {
            return RawConfig::null();
        }
        let id = lib.fresh_id();
        lib.configs.insert(id, Vec::new());
        lib.stats.configs_created += 1;
        RawConfig::from_id(id)
    }

    unsafe fn del_config(&self, config: RawConfig) {
        let mut lib = self.lock();
        if lib.configs.remove(&config.id()).is_some() {
            lib.stats.configs_destroyed += 1;
        } else {
            lib.stats.invalid_destroys += 1;
        }
    }

    unsafe fn config_set_param(&self, config: RawConfig, name: &CStr, value: &CStr) {
        let mut lib = self.lock();
        if let Some(params) = lib.configs.get_mut(&config.id()) {
            params.push((
                name.to_string_lossy().into_owned(),
                value.to_string_lossy().into_owned(),
            ));
        }
    }

    unsafe fn mk_engine(&self, config: RawConfig) -> RawEngine {
        let mut lib = self.lock();
        if lib.take_fault(Fault::NullEngine) {
            return RawEngine::null();
        }
        let Some(params) = lib.configs.get(&config.id()).cloned() else {
            return RawEngine::null();
        };
        let mut state = EngineState::default();
        for (name, value) in params {
            if let Err(error) = validate_param(&name, &value) {
                tracing::warn!(%name, %value, "rejecting engine configuration: {}", error.message);
                return RawEngine::null();
            }
            state.params.insert(name, value);
        }
        let id = lib.fresh_id();
        lib.engines.insert(id, state);
        lib.stats.engines_created += 1;
        RawEngine::from_id(id)
    }

    unsafe fn del_engine(&self, engine: RawEngine) {
        let mut lib = self.lock();
        match lib.engines.remove(&engine.id()) {
            Some(state) => {
                lib.stats.refs_leaked += state.held_refs();
                lib.stats.engines_destroyed += 1;
            }
            None => lib.stats.invalid_destroys += 1,
        }
    }

    unsafe fn set_param(&self, engine: RawEngine, name: &CStr, value: &CStr) {
        let name = name.to_string_lossy().into_owned();
        let value = value.to_string_lossy().into_owned();
        self.with_engine(engine, (), |s| {
            validate_param(&name, &value)?;
            s.state.params.insert(name, value);
            Ok(())
        })
    }

    unsafe fn last_error(&self, engine: RawEngine) -> Option<NativeError> {
        let lib = self.lock();
        lib.engines.get(&engine.id())?.error.clone()
    }

    unsafe fn set_error_handler(&self, engine: RawEngine, handler: ErrorHandler) {
        let mut lib = self.lock();
        if let Some(state) = lib.engines.get_mut(&engine.id()) {
            state.handler = Some(handler);
        }
    }

    unsafe fn inc_ref(&self, engine: RawEngine, ast: RawAst) {
        self.with_engine(engine, (), |s| {
            let node = s
                .state
                .nodes
                .get_mut(&ast.id())
                .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "invalid AST handle"))?;
            if node.released && node.rc == 0 {
                s.stats.freed_handle_uses += 1;
            }
            node.rc += 1;
            node.released = false;
            Ok(())
        })
    }

    unsafe fn dec_ref(&self, engine: RawEngine, ast: RawAst) {
        self.with_engine(engine, (), |s| {
            let node = s
                .state
                .nodes
                .get_mut(&ast.id())
                .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "invalid AST handle"))?;
            if node.rc == 0 {
                s.stats.dec_ref_underflows += 1;
                return Err(fail(ErrorCode::DEC_REF_ERROR, "reference count underflow"));
            }
            node.rc -= 1;
            if node.rc == 0 {
                node.released = true;
            }
            Ok(())
        })
    }

    unsafe fn mk_bool_sort(&self, engine: RawEngine) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| Ok(s.intern(Term::Sort(SortKey::Bool), None)))
    }

    unsafe fn mk_int_sort(&self, engine: RawEngine) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| Ok(s.intern(Term::Sort(SortKey::Int), None)))
    }

    unsafe fn mk_real_sort(&self, engine: RawEngine) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| Ok(s.intern(Term::Sort(SortKey::Real), None)))
    }

    unsafe fn mk_bv_sort(&self, engine: RawEngine, width: u32) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            if width == 0 {
                return Err(fail(ErrorCode::INVALID_ARG, "bitvector width must be positive"));
            }
            Ok(s.intern(Term::Sort(SortKey::Bv(width)), None))
        })
    }

    unsafe fn mk_const(&self, engine: RawEngine, name: &CStr, sort: RawAst) -> RawAst {
        let name = name.to_string_lossy().into_owned();
        self.with_engine(engine, RawAst::null(), |s| {
            let key = s.sort_node(sort)?;
            Ok(s.intern(Term::Const(name, key), Some(key)))
        })
    }

    unsafe fn mk_numeral(&self, engine: RawEngine, numeral: &CStr, sort: RawAst) -> RawAst {
        let text = numeral.to_string_lossy().into_owned();
        self.with_engine(engine, RawAst::null(), |s| {
            let key = s.sort_node(sort)?;
            let parse_error = || fail(ErrorCode::PARSER_ERROR, format!("invalid numeral '{text}'"));
            let value = match key {
                SortKey::Int => Value::Int(text.parse().map_err(|_| parse_error())?),
                SortKey::Real => Value::Real(Rational::parse(&text).ok_or_else(parse_error)?),
                SortKey::Bv(width) => {
                    let bits = match text.parse::<u128>() {
                        Ok(bits) => bits,
                        Err(_) => text.parse::<i128>().map_err(|_| parse_error())? as u128,
                    };
                    Value::Bv {
                        bits: bits & bv_mask(width),
                        width,
                    }
                }
                SortKey::Bool => {
                    return Err(fail(ErrorCode::SORT_ERROR, "numerals cannot have sort Bool"));
                }
            };
            Ok(s.intern_value(value))
        })
    }

    unsafe fn mk_bool(&self, engine: RawEngine, value: bool) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| Ok(s.intern_value(Value::Bool(value))))
    }

    unsafe fn mk_eq(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            s.same_sort(lhs, rhs)?;
            Ok(s.app(Op::Eq, &[lhs, rhs], SortKey::Bool))
        })
    }

    unsafe fn mk_not(&self, engine: RawEngine, arg: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            s.all_sort(&[arg], |k| k == SortKey::Bool)?;
            Ok(s.app(Op::Not, &[arg], SortKey::Bool))
        })
    }

    unsafe fn mk_and(&self, engine: RawEngine, args: &[RawAst]) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            s.all_sort(args, |k| k == SortKey::Bool)?;
            Ok(s.app(Op::And, args, SortKey::Bool))
        })
    }

    unsafe fn mk_or(&self, engine: RawEngine, args: &[RawAst]) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            s.all_sort(args, |k| k == SortKey::Bool)?;
            Ok(s.app(Op::Or, args, SortKey::Bool))
        })
    }

    unsafe fn mk_add(&self, engine: RawEngine, args: &[RawAst]) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            let sort = s.all_sort(args, |k| matches!(k, SortKey::Int | SortKey::Real))?;
            Ok(s.app(Op::Add, args, sort))
        })
    }

    unsafe fn mk_le(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| s.compare(Op::Le, lhs, rhs))
    }

    unsafe fn mk_lt(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| s.compare(Op::Lt, lhs, rhs))
    }

    unsafe fn mk_ge(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| s.compare(Op::Ge, lhs, rhs))
    }

    unsafe fn mk_bvadd(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| s.bv_binary(Op::BvAdd, lhs, rhs, false))
    }

    unsafe fn mk_bvult(&self, engine: RawEngine, lhs: RawAst, rhs: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| s.bv_binary(Op::BvUlt, lhs, rhs, true))
    }

    unsafe fn mk_forall(&self, engine: RawEngine, bound: &[RawAst], body: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            for var in bound {
                if !matches!(s.node(*var)?.0, Term::Const(..)) {
                    return Err(fail(ErrorCode::INVALID_ARG, "bound variables must be constants"));
                }
            }
            if s.expr_sort(body)? != SortKey::Bool {
                return Err(fail(ErrorCode::SORT_ERROR, "quantifier body must be Boolean"));
            }
            let vars = bound.iter().map(|b| b.id()).collect();
            Ok(s.intern(Term::Forall(vars, body.id()), Some(SortKey::Bool)))
        })
    }

    unsafe fn sort_of(&self, engine: RawEngine, ast: RawAst) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| {
            let key = s.expr_sort(ast)?;
            Ok(s.intern(Term::Sort(key), None))
        })
    }

    unsafe fn sort_kind(&self, engine: RawEngine, sort: RawAst) -> SortKind {
        self.with_engine(engine, SortKind::Other, |s| Ok(s.sort_node(sort)?.kind()))
    }

    unsafe fn bv_size(&self, engine: RawEngine, sort: RawAst) -> u32 {
        self.with_engine(engine, 0, |s| match s.sort_node(sort)? {
            SortKey::Bv(width) => Ok(width),
            _ => Err(fail(ErrorCode::SORT_ERROR, "not a bitvector sort")),
        })
    }

    unsafe fn is_numeral(&self, engine: RawEngine, ast: RawAst) -> bool {
        self.with_engine(engine, false, |s| {
            Ok(matches!(s.node(ast)?.0, Term::Lit(ref v) if !matches!(v, Value::Bool(_))))
        })
    }

    unsafe fn numeral_string(&self, engine: RawEngine, ast: RawAst) -> String {
        self.with_engine(engine, String::new(), |s| match s.node(ast)?.0 {
            Term::Lit(value) => value
                .numeral()
                .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "not a numeral")),
            _ => Err(fail(ErrorCode::INVALID_ARG, "not a numeral")),
        })
    }

    unsafe fn bool_value(&self, engine: RawEngine, ast: RawAst) -> LBool {
        self.with_engine(engine, LBool::Undef, |s| {
            Ok(match s.node(ast)?.0 {
                Term::Lit(Value::Bool(true)) => LBool::True,
                Term::Lit(Value::Bool(false)) => LBool::False,
                _ => LBool::Undef,
            })
        })
    }

    unsafe fn is_string(&self, engine: RawEngine, ast: RawAst) -> bool {
        self.with_engine(engine, false, |s| {
            s.node(ast)?;
            Ok(false)
        })
    }

    unsafe fn string_value(&self, engine: RawEngine, ast: RawAst) -> String {
        self.with_engine(engine, String::new(), |s| {
            s.node(ast)?;
            Err(fail(ErrorCode::INVALID_ARG, "string constant expected"))
        })
    }

    unsafe fn ast_to_string(&self, engine: RawEngine, ast: RawAst) -> String {
        self.with_engine(engine, String::new(), |s| {
            s.node(ast)?;
            Ok(s.render(ast.id()))
        })
    }

    unsafe fn mk_solver(&self, engine: RawEngine) -> RawSolver {
        self.with_engine(engine, RawSolver::null(), |s| {
            if s.take_fault(Fault::NullSolver) {
                return Ok(RawSolver::null());
            }
            let id = s.fresh_id();
            s.state.solvers.insert(id, Checker::new(false));
            Ok(RawSolver::from_id(id))
        })
    }

    unsafe fn mk_simple_solver(&self, engine: RawEngine) -> RawSolver {
        self.with_engine(engine, RawSolver::null(), |s| {
            if s.take_fault(Fault::NullSolver) {
                return Ok(RawSolver::null());
            }
            let id = s.fresh_id();
            s.state.solvers.insert(id, Checker::new(true));
            Ok(RawSolver::from_id(id))
        })
    }

    unsafe fn solver_inc_ref(&self, engine: RawEngine, solver: RawSolver) {
        let id = solver.id();
        self.retain(engine, id, |state| {
            state.solvers.get_mut(&id).map(|c| (&mut c.rc, &mut c.held))
        });
    }

    unsafe fn solver_dec_ref(&self, engine: RawEngine, solver: RawSolver) {
        self.with_engine(engine, (), |s| release_checker(s, Table::Solver, solver.id()))
    }

    unsafe fn solver_assert(&self, engine: RawEngine, solver: RawSolver, constraint: RawAst) {
        self.with_engine(engine, (), |s| s.assert_into(Table::Solver, solver.id(), constraint))
    }

    unsafe fn solver_check(&self, engine: RawEngine, solver: RawSolver) -> LBool {
        self.with_engine(engine, LBool::Undef, |s| s.run_check(Table::Solver, solver.id()))
    }

    unsafe fn solver_push(&self, engine: RawEngine, solver: RawSolver) {
        self.with_engine(engine, (), |s| {
            let checker = s.checker(Table::Solver, solver.id())?;
            checker.frames.push(Vec::new());
            Ok(())
        })
    }

    unsafe fn solver_pop(&self, engine: RawEngine, solver: RawSolver, n: u32) {
        self.with_engine(engine, (), |s| {
            let checker = s.checker(Table::Solver, solver.id())?;
            if n > checker.scopes() {
                return Err(fail(
                    ErrorCode::INVALID_USAGE,
                    format!("cannot pop {n} scopes, only {} available", checker.scopes()),
                ));
            }
            let keep = checker.frames.len() - n as usize;
            checker.frames.truncate(keep);
            Ok(())
        })
    }

    unsafe fn solver_reset(&self, engine: RawEngine, solver: RawSolver) {
        self.with_engine(engine, (), |s| {
            let checker = s.checker(Table::Solver, solver.id())?;
            checker.frames = vec![Vec::new()];
            checker.last = None;
            Ok(())
        })
    }

    unsafe fn solver_num_scopes(&self, engine: RawEngine, solver: RawSolver) -> u32 {
        self.with_engine(engine, 0, |s| Ok(s.checker(Table::Solver, solver.id())?.scopes()))
    }

    unsafe fn solver_get_model(&self, engine: RawEngine, solver: RawSolver) -> RawModel {
        self.with_engine(engine, RawModel::null(), |s| s.model_from(Table::Solver, solver.id()))
    }

    unsafe fn solver_reason_unknown(&self, engine: RawEngine, solver: RawSolver) -> String {
        self.with_engine(engine, String::new(), |s| {
            let checker = s.checker(Table::Solver, solver.id())?;
            Ok(checker
                .last
                .as_ref()
                .map(|o| o.reason.clone())
                .unwrap_or_default())
        })
    }

    unsafe fn solver_set_params(&self, engine: RawEngine, solver: RawSolver, params: RawParams) {
        self.with_engine(engine, (), |s| {
            let values = match s.state.param_sets.get(&params.id()) {
                Some(set) => set.values.clone(),
                None => {
                    s.stats.freed_handle_uses += 1;
                    return Err(fail(ErrorCode::INVALID_ARG, "invalid or freed parameter set"));
                }
            };
            if s.take_fault(Fault::ParamsRejected) {
                return Err(fail(ErrorCode::INVALID_ARG, "parameter set rejected"));
            }
            let mut timeout = None;
            for (name, value) in values {
                match name.as_str() {
                    "timeout" => timeout = Some(value),
                    other => {
                        return Err(fail(
                            ErrorCode::INVALID_ARG,
                            format!("unknown parameter '{other}'"),
                        ));
                    }
                }
            }
            let checker = s.checker(Table::Solver, solver.id())?;
            if timeout.is_some() {
                checker.timeout_ms = timeout;
            }
            Ok(())
        })
    }

    unsafe fn solver_to_string(&self, engine: RawEngine, solver: RawSolver) -> String {
        self.with_engine(engine, String::new(), |s| {
            let assertions = s.checker(Table::Solver, solver.id())?.assertions();
            let footprint = Footprint::collect(&s.state.nodes, &assertions);
            let mut out = String::new();
            for id in &footprint.free {
                if let Some(sort) = s.state.nodes.get(id).and_then(|n| n.sort) {
                    let _ = writeln!(out, "(declare-fun {} () {})", s.render(*id), sort.render());
                }
            }
            for id in assertions {
                let _ = writeln!(out, "(assert {})", s.render(id));
            }
            Ok(out)
        })
    }

    unsafe fn mk_optimize(&self, engine: RawEngine) -> RawOptimize {
        self.with_engine(engine, RawOptimize::null(), |s| {
            if s.take_fault(Fault::NullOptimize) {
                return Ok(RawOptimize::null());
            }
            let id = s.fresh_id();
            s.state.optimizers.insert(id, Checker::new(false));
            Ok(RawOptimize::from_id(id))
        })
    }

    unsafe fn optimize_inc_ref(&self, engine: RawEngine, opt: RawOptimize) {
        let id = opt.id();
        self.retain(engine, id, |state| {
            state.optimizers.get_mut(&id).map(|c| (&mut c.rc, &mut c.held))
        });
    }

    unsafe fn optimize_dec_ref(&self, engine: RawEngine, opt: RawOptimize) {
        self.with_engine(engine, (), |s| release_checker(s, Table::Optimize, opt.id()))
    }

    unsafe fn optimize_assert(&self, engine: RawEngine, opt: RawOptimize, constraint: RawAst) {
        self.with_engine(engine, (), |s| s.assert_into(Table::Optimize, opt.id(), constraint))
    }

    unsafe fn optimize_check(&self, engine: RawEngine, opt: RawOptimize) -> LBool {
        self.with_engine(engine, LBool::Undef, |s| s.run_check(Table::Optimize, opt.id()))
    }

    unsafe fn optimize_push(&self, engine: RawEngine, opt: RawOptimize) {
        self.with_engine(engine, (), |s| {
            let checker = s.checker(Table::Optimize, opt.id())?;
            checker.frames.push(Vec::new());
            Ok(())
        })
    }

    unsafe fn optimize_pop(&self, engine: RawEngine, opt: RawOptimize) {
        self.with_engine(engine, (), |s| {
            let checker = s.checker(Table::Optimize, opt.id())?;
            if checker.scopes() == 0 {
                return Err(fail(ErrorCode::INVALID_USAGE, "no scope to pop"));
            }
            checker.frames.pop();
            Ok(())
        })
    }

    unsafe fn optimize_maximize(&self, engine: RawEngine, opt: RawOptimize, term: RawAst) -> u32 {
        self.with_engine(engine, 0, |s| add_objective(s, opt, term, true))
    }

    unsafe fn optimize_minimize(&self, engine: RawEngine, opt: RawOptimize, term: RawAst) -> u32 {
        self.with_engine(engine, 0, |s| add_objective(s, opt, term, false))
    }

    unsafe fn optimize_upper(&self, engine: RawEngine, opt: RawOptimize, index: u32) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| objective_bound(s, opt, index))
    }

    unsafe fn optimize_lower(&self, engine: RawEngine, opt: RawOptimize, index: u32) -> RawAst {
        self.with_engine(engine, RawAst::null(), |s| objective_bound(s, opt, index))
    }

    unsafe fn optimize_get_model(&self, engine: RawEngine, opt: RawOptimize) -> RawModel {
        self.with_engine(engine, RawModel::null(), |s| s.model_from(Table::Optimize, opt.id()))
    }

    unsafe fn optimize_reason_unknown(&self, engine: RawEngine, opt: RawOptimize) -> String {
        self.with_engine(engine, String::new(), |s| {
            let checker = s.checker(Table::Optimize, opt.id())?;
            Ok(checker
                .last
                .as_ref()
                .map(|o| o.reason.clone())
                .unwrap_or_default())
        })
    }

    unsafe fn mk_params(&self, engine: RawEngine) -> RawParams {
        self.with_engine(engine, RawParams::null(), |s| {
            let id = s.fresh_id();
            s.state.param_sets.insert(
                id,
                ParamSet {
                    rc: 0,
                    held: false,
                    values: Vec::new(),
                },
            );
            Ok(RawParams::from_id(id))
        })
    }

    unsafe fn params_inc_ref(&self, engine: RawEngine, params: RawParams) {
        let id = params.id();
        self.retain(engine, id, |state| {
            state.param_sets.get_mut(&id).map(|p| (&mut p.rc, &mut p.held))
        });
    }

    unsafe fn params_dec_ref(&self, engine: RawEngine, params: RawParams) {
        self.with_engine(engine, (), |s| {
            let id = params.id();
            let set = s
                .state
                .param_sets
                .get_mut(&id)
                .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "invalid or freed parameter set"))?;
            if set.rc == 0 {
                s.stats.dec_ref_underflows += 1;
                return Err(fail(ErrorCode::DEC_REF_ERROR, "reference count underflow"));
            }
            set.rc -= 1;
            if set.rc == 0 && set.held {
                s.state.param_sets.remove(&id);
            }
            Ok(())
        })
    }

    unsafe fn params_set_uint(&self, engine: RawEngine, params: RawParams, name: &CStr, value: u32) {
        let name = name.to_string_lossy().into_owned();
        self.with_engine(engine, (), |s| {
            let set = s
                .state
                .param_sets
                .get_mut(&params.id())
                .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "invalid or freed parameter set"))?;
            set.values.retain(|(n, _)| *n != name);
            set.values.push((name, value));
            Ok(())
        })
    }

    unsafe fn model_inc_ref(&self, engine: RawEngine, model: RawModel) {
        let id = model.id();
        self.retain(engine, id, |state| {
            state.models.get_mut(&id).map(|m| (&mut m.rc, &mut m.held))
        });
    }

    unsafe fn model_dec_ref(&self, engine: RawEngine, model: RawModel) {
        self.with_engine(engine, (), |s| {
            let id = model.id();
            let state = s
                .state
                .models
                .get_mut(&id)
                .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "invalid or freed model handle"))?;
            if state.rc == 0 {
                s.stats.dec_ref_underflows += 1;
                return Err(fail(ErrorCode::DEC_REF_ERROR, "reference count underflow"));
            }
            state.rc -= 1;
            if state.rc == 0 && state.held {
                s.state.models.remove(&id);
            }
            Ok(())
        })
    }

    unsafe fn model_eval(
        &self,
        engine: RawEngine,
        model: RawModel,
        ast: RawAst,
        completion: bool,
    ) -> Option<RawAst> {
        self.with_engine(engine, None, |s| {
            let assignment = match s.state.models.get(&model.id()) {
                Some(m) => m.assignment.clone(),
                None => {
                    s.stats.freed_handle_uses += 1;
                    return Err(fail(ErrorCode::INVALID_ARG, "invalid or freed model handle"));
                }
            };
            s.node(ast)?;
            if s.take_fault(Fault::EvalRefused) {
                return Ok(None);
            }
            let value = {
                let footprint = Footprint::collect(&s.state.nodes, &[ast.id()]);
                let evaluator = Evaluator {
                    nodes: &s.state.nodes,
                    candidates: footprint.candidates(),
                    completion,
                };
                let mut env = assignment;
                evaluator.eval(ast.id(), &mut env)
            };
            Ok(match value {
                Some(value) => Some(s.intern_value(value)),
                // Without completion the engine hands back the term itself.
                None if !completion => Some(ast),
                None => None,
            })
        })
    }

    unsafe fn model_to_string(&self, engine: RawEngine, model: RawModel) -> String {
        self.with_engine(engine, String::new(), |s| {
            let state = s
                .state
                .models
                .get(&model.id())
                .ok_or_else(|| fail(ErrorCode::INVALID_ARG, "invalid or freed model handle"))?;
            let mut lines: Vec<String> = state
                .assignment
                .iter()
                .map(|(id, value)| format!("{} -> {}", s.render(*id), value.render()))
                .collect();
            lines.sort();
            Ok(lines.join("\n"))
        })
    }
}

fn release_checker(s: &mut Session<'_>, table: Table, id: usize) -> Result<(), NativeError> {
    let map = match table {
        Table::Solver => &mut s.state.solvers,
        Table::Optimize => &mut s.state.optimizers,
    };
    let Some(checker) = map.get_mut(&id) else {
        s.stats.freed_handle_uses += 1;
        return Err(fail(ErrorCode::INVALID_ARG, "invalid or freed solver handle"));
    };
    if checker.rc == 0 {
        s.stats.dec_ref_underflows += 1;
        return Err(fail(ErrorCode::DEC_REF_ERROR, "reference count underflow"));
    }
    checker.rc -= 1;
    if checker.rc == 0 && checker.held {
        map.remove(&id);
    }
    Ok(())
}

fn add_objective(
    s: &mut Session<'_>,
    opt: RawOptimize,
    term: RawAst,
    maximize: bool,
) -> Result<u32, NativeError> {
    let sort = s.expr_sort(term)?;
    if !matches!(sort, SortKey::Int | SortKey::Real | SortKey::Bv(_)) {
        return Err(fail(ErrorCode::SORT_ERROR, "objective must be numeric"));
    }
    let checker = s.checker(Table::Optimize, opt.id())?;
    checker.objectives.push(Objective {
        term: term.id(),
        maximize,
    });
    Ok((checker.objectives.len() - 1) as u32)
}

fn objective_bound(s: &mut Session<'_>, opt: RawOptimize, index: u32) -> Result<RawAst, NativeError> {
    let checker = s.checker(Table::Optimize, opt.id())?;
    if index as usize >= checker.objectives.len() {
        return Err(fail(ErrorCode::INDEX_OUT_OF_BOUNDS, format!("no objective {index}")));
    }
    let value = match &checker.last {
        Some(outcome) if outcome.result == LBool::True => outcome
            .optimum
            .get(index as usize)
            .cloned()
            .ok_or_else(|| fail(ErrorCode::INVALID_USAGE, "objective has no value"))?,
        _ => return Err(fail(ErrorCode::INVALID_USAGE, "optimization has not produced a result")),
    };
    Ok(s.intern_value(value))
}

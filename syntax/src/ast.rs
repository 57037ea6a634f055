/// type alias just to make type signatures look more consistent.
pub type Ident<'a> = &'a str;

/// Where a transition goes after a task finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target<'a> {
    /// @link_name
    Link(Ident<'a>),
    /// done: terminal, unit completed
    Done,
    /// failed: terminal, unit failed
    Failed,
}

/// Which targets an exec task fans out over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// one job per matching file in the unit
    PerFile,
    /// one job for the whole unit
    PerUnit,
}

/// Optional trailing parts of a `run` statement.
#[derive(Debug, PartialEq, Eq)]
pub enum ExecModifier<'a> {
    /// stdout "template": log file that captured stdout is appended to
    Stdout(&'a str),
    /// stderr "template": log file that captured stderr is appended to
    Stderr(&'a str),
    /// in "subdir/": only fan out over files under this unit subdirectory
    Within(&'a str),
    /// suffix ".ext": only fan out over files whose names end with this
    Suffix(&'a str),
}

/// `run <scope> <exec> "<args>" [modifiers...]`
#[derive(Debug, PartialEq, Eq)]
pub struct Exec<'a> {
    pub scope: Scope,
    /// executable name or path
    pub exec: &'a str,
    /// argument template, not yet split into words
    pub args: &'a str,
    pub modifiers: Vec<ExecModifier<'a>>,
}

/// One option inside a `choice { ... }` block.
#[derive(Debug, PartialEq, Eq)]
pub struct ChoiceOption<'a> {
    pub name: Ident<'a>,
    pub description: &'a str,
    /// optional `-> target` overriding the link's exit-0 transition
    pub next: Option<Target<'a>>,
    /// `{ Var = "value" ... }`, in the order written
    pub assignments: Vec<(Ident<'a>, &'a str)>,
}

/// Right-hand side of a `set` statement.
#[derive(Debug, PartialEq, Eq)]
pub enum SetValue<'a> {
    Literal(&'a str),
    Link(Ident<'a>),
}

/// The single task a link performs.
#[derive(Debug, PartialEq, Eq)]
pub enum TaskSpec<'a> {
    Run(Exec<'a>),
    Choice(Vec<ChoiceOption<'a>>),
    /// set Var = "value" | set Var = @link
    Set { var: Ident<'a>, value: SetValue<'a> },
    /// pull Var
    Pull { var: Ident<'a> },
    /// magic @link
    Magic(Ident<'a>),
    /// goto-magic
    GotoMagic,
}

/// A statement inside a `link { ... }` block.
#[derive(Debug, PartialEq, Eq)]
pub enum LinkStatement<'a> {
    Group(&'a str),
    Task(TaskSpec<'a>),
    Exit(i32, Target<'a>),
    Default(Target<'a>),
}

/// `link name { statements... }`
#[derive(Debug, PartialEq, Eq)]
pub struct LinkBlock<'a> {
    pub name: Ident<'a>,
    pub statements: Vec<LinkStatement<'a>>,
}

/// One high-level item in a workflow file.
#[derive(Debug, PartialEq, Eq)]
pub enum Item<'a> {
    /// start <unit kind> -> @link
    Start(Ident<'a>, Ident<'a>),
    /// A chain link definition.
    Link(LinkBlock<'a>),
    /// answers { choice_link = option ... }
    Answers(Vec<(Ident<'a>, &'a str)>),
}

/// Piece of an argument template: literal text or a `%variable%`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Var(Ident<'a>),
}

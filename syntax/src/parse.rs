use anyhow::Result;

use crate::ast::{Item, Segment};

#[derive(Debug, thiserror::Error)]
#[error("ParseError on line '{line}': {msg}")]
pub struct Error {
    msg: String,
    pos: usize,
    line: String,
}

impl Error {
    fn new(text: &str, pos: usize, msg: String) -> Self {
        // isolate the line in question:
        let before = &text[0..pos];
        let after = &text[pos..text.len()];
        let prefix: String = before.chars().rev().take_while(|&c| c != '\n').collect();
        let prefix: String = prefix.chars().rev().collect();
        let suffix: String = after.chars().take_while(|&c| c != '\n').collect();
        Self {
            pos,
            line: prefix + &suffix,
            msg,
        }
    }

    /// Byte offset into the parsed text where the error occurred.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

/// Parse the text of a workflow definition (or processing configuration) file.
pub fn parse(text: &str) -> Result<Vec<Item<'_>>> {
    use combine::EasyParser;
    workflow_file::items()
        .easy_parse(text)
        .map(|(items, _remainder)| items)
        .map_err(|e| {
            // since converting combine's errors is a lifetime nightmare,
            // we just stringify the error before returning it.
            Error::new(text, e.position.translate_position(text), format!("{}", e)).into()
        })
}

/// Split an argument template into words, honoring single and double quotes.
/// Quotes are removed; `%variables%` are left in place.
pub fn split_words(text: &str) -> Result<Vec<String>> {
    use combine::EasyParser;
    words::words()
        .easy_parse(text)
        .map(|(words, _)| words)
        .map_err(|e| {
            Error::new(text, e.position.translate_position(text), format!("{}", e)).into()
        })
}

/// Split a single word into literal text and `%variable%` references.
pub fn template_segments(text: &str) -> Result<Vec<Segment<'_>>> {
    use combine::EasyParser;
    template::segments()
        .easy_parse(text)
        .map(|(segments, _)| segments)
        .map_err(|e| {
            Error::new(text, e.position.translate_position(text), format!("{}", e)).into()
        })
}

pub mod prelude {
    pub use combine::parser::char::{char, string};
    pub use combine::parser::range::recognize;
    pub use combine::*;
}

pub mod util {

    use super::prelude::*;
    use combine::error::ParseError;
    use combine::parser::char::{alpha_num, letter, space};
    use combine::stream::{RangeStream, StreamOnce};

    p! {
        ident_start() -> char, {
            char('_').or(letter())
        }
    }

    p! {
        ident_rest() -> Vec<char>, {
            many(char('_').or(alpha_num()))
        }
    }

    p! {
        ident() -> &'a str, {
            recognize(ident_start().and(ident_rest()))
        }
    }

    // comments run to the end of the line; the newline itself is whitespace.
    p! {
        comment() -> (), {
            char('#').with(skip_many(none_of("\n".chars())))
        }
    }

    p! {
        whitespace() -> (), {
            skip_many1(
                space().map(|_| ()).or(comment())
            )
        }
    }

    // every token eats the whitespace that follows it,
    // so a failed token never leaves us having consumed input.
    wrapper! {
        lex(parser), {
            parser.skip(optional(whitespace()))
        }
    }

    wrapper! {
        braces(parser), {
            lex(char('{')).with(parser).skip(lex(char('}')))
        }
    }

    p! {
        arrow() -> (), {
            lex(attempt(string("->"))).map(|_| ())
        }
    }

    /// A reserved word that is not the prefix of a longer word.
    pub fn keyword<'a, I>(word: &'static str) -> impl Parser<I, Output = ()>
    where
        I: RangeStream<Range = &'a str, Token = char>,
        I::Error: ParseError<char, &'a str, <I as StreamOnce>::Position>,
    {
        attempt(
            string(word)
                .skip(not_followed_by(satisfy(|c: char| {
                    c.is_alphanumeric() || c == '_' || c == '-'
                })))
                .map(|_| ()),
        )
    }

}

mod literal {

    use super::prelude::*;
    use combine::parser::char::digit;

    const FORBID_UNQUOTED: [char; 7] = ['{', '}', '"', '\'', '#', '@', '='];

    p! {
        double_quoted() -> &'a str, {
            char('"').with(recognize(skip_many(none_of("\"".chars())))).skip(char('"'))
        }
    }

    p! {
        single_quoted() -> &'a str, {
            char('\'').with(recognize(skip_many(none_of("'".chars())))).skip(char('\''))
        }
    }

    p! {
        unquoted_literal_char() -> char, {
            satisfy(|c: char|
                !c.is_whitespace() && !FORBID_UNQUOTED.iter().any(|&forbidden| forbidden == c)
            )
        }
    }

    p! {
        unquoted_literal() -> &'a str, {
            recognize(skip_many1(unquoted_literal_char()))
        }
    }

    p! {
        literal() -> &'a str, {
            double_quoted().or(single_quoted()).or(unquoted_literal())
        }
    }

    p! {
        exit_code() -> i32, {
            recognize((optional(char('-')), skip_many1(digit())))
                .and_then(|s: &'a str| s.parse::<i32>())
        }
    }

    #[cfg(test)]
    mod test {
        use anyhow::Result;
        use combine::EasyParser;
        #[test]
        fn test_literal() -> Result<()> {
            assert_eq!("assignUUIDs", super::literal().easy_parse("assignUUIDs").unwrap().0);
            assert_eq!(
                "quoted text",
                super::literal().easy_parse("\"quoted text\"").unwrap().0
            );
            assert_eq!(
                "\"%fileUUID%\" --bind-pids",
                super::literal().easy_parse("'\"%fileUUID%\" --bind-pids'").unwrap().0
            );
            assert_eq!(
                "/usr/lib/scripts/bind.py",
                super::literal().easy_parse("/usr/lib/scripts/bind.py {").unwrap().0
            );
            Ok(())
        }
        #[test]
        fn test_exit_code() -> Result<()> {
            assert_eq!(0, super::exit_code().easy_parse("0").unwrap().0);
            assert_eq!(179, super::exit_code().easy_parse("179 ->").unwrap().0);
            assert_eq!(-1, super::exit_code().easy_parse("-1").unwrap().0);
            assert!(super::exit_code().easy_parse("x").is_err());
            Ok(())
        }
    }
}

mod target {

    use super::prelude::*;
    use super::util::{ident, keyword};
    use crate::ast::Target;

    p! {
        link_ref() -> &'a str, {
            char('@').with(ident())
        }
    }

    p! {
        target() -> Target<'a>, {
            choice!(
                link_ref().map(Target::Link),
                keyword("done").map(|_| Target::Done),
                keyword("failed").map(|_| Target::Failed)
            )
        }
    }

    #[cfg(test)]
    mod test {
        use crate::ast::Target;
        use anyhow::Result;
        use combine::EasyParser;
        #[test]
        fn test_target() -> Result<()> {
            assert_eq!(
                Target::Link("bind_pids"),
                super::target().easy_parse("@bind_pids").unwrap().0
            );
            assert_eq!(Target::Done, super::target().easy_parse("done").unwrap().0);
            assert_eq!(Target::Failed, super::target().easy_parse("failed").unwrap().0);
            assert!(super::target().easy_parse("bind_pids").is_err());
            Ok(())
        }
    }
}

mod task {

    use super::literal::literal;
    use super::prelude::*;
    use super::target::{link_ref, target};
    use super::util::{arrow, braces, ident, keyword, lex};
    use crate::ast::{ChoiceOption, Exec, ExecModifier, Scope, SetValue, TaskSpec};

    p! {
        scope() -> Scope, {
            keyword("per-file").map(|_| Scope::PerFile)
                .or(keyword("per-unit").map(|_| Scope::PerUnit))
        }
    }

    p! {
        exec_modifier() -> ExecModifier<'a>, {
            choice!(
                lex(keyword("stdout")).with(lex(literal())).map(ExecModifier::Stdout),
                lex(keyword("stderr")).with(lex(literal())).map(ExecModifier::Stderr),
                lex(keyword("in")).with(lex(literal())).map(ExecModifier::Within),
                lex(keyword("suffix")).with(lex(literal())).map(ExecModifier::Suffix)
            )
        }
    }

    p! {
        run() -> TaskSpec<'a>, {
            lex(keyword("run"))
                .with((
                    lex(scope()),
                    lex(literal()),
                    lex(literal()),
                    many::<Vec<_>, _, _>(exec_modifier()),
                ))
                .map(|(scope, exec, args, modifiers)| {
                    TaskSpec::Run(Exec { scope, exec, args, modifiers })
                })
        }
    }

    p! {
        assignment() -> (&'a str, &'a str), {
            lex(ident()).skip(lex(char('='))).and(lex(literal()))
        }
    }

    p! {
        assignments() -> Vec<(&'a str, &'a str)>, {
            braces(many(assignment()))
        }
    }

    p! {
        choice_option() -> ChoiceOption<'a>, {
            lex(keyword("option"))
                .with((
                    lex(ident()),
                    lex(literal()),
                    optional(arrow().with(lex(target()))),
                    optional(assignments()),
                ))
                .map(|(name, description, next, assignments)| ChoiceOption {
                    name,
                    description,
                    next,
                    assignments: assignments.unwrap_or_default(),
                })
        }
    }

    p! {
        choice_block() -> TaskSpec<'a>, {
            lex(keyword("choice"))
                .with(braces(many::<Vec<_>, _, _>(choice_option())))
                .map(TaskSpec::Choice)
        }
    }

    p! {
        set_value() -> SetValue<'a>, {
            link_ref().map(SetValue::Link).or(literal().map(SetValue::Literal))
        }
    }

    p! {
        set() -> TaskSpec<'a>, {
            lex(keyword("set"))
                .with(lex(ident()))
                .skip(lex(char('=')))
                .and(lex(set_value()))
                .map(|(var, value)| TaskSpec::Set { var, value })
        }
    }

    p! {
        pull() -> TaskSpec<'a>, {
            lex(keyword("pull")).with(lex(ident())).map(|var| TaskSpec::Pull { var })
        }
    }

    p! {
        magic() -> TaskSpec<'a>, {
            lex(keyword("magic")).with(lex(link_ref())).map(TaskSpec::Magic)
        }
    }

    p! {
        goto_magic() -> TaskSpec<'a>, {
            lex(keyword("goto-magic")).map(|_| TaskSpec::GotoMagic)
        }
    }

    p! {
        task_spec() -> TaskSpec<'a>, {
            choice!(
                run(),
                choice_block(),
                set(),
                pull(),
                magic(),
                goto_magic()
            )
        }
    }

    #[cfg(test)]
    mod test {
        use crate::ast::{ChoiceOption, Exec, ExecModifier, Scope, SetValue, Target, TaskSpec};
        use anyhow::Result;
        use combine::EasyParser;
        #[test]
        fn test_run() -> Result<()> {
            assert_eq!(
                TaskSpec::Run(Exec {
                    scope: Scope::PerFile,
                    exec: "bindPID_v0.0",
                    args: "\"%fileUUID%\" --bind-pids \"%BindPIDs%\"",
                    modifiers: vec![
                        ExecModifier::Stdout("%SIPLogsDirectory%handles.log"),
                        ExecModifier::Within("objects/"),
                    ],
                }),
                super::task_spec()
                    .easy_parse(
                        "run per-file bindPID_v0.0 '\"%fileUUID%\" --bind-pids \"%BindPIDs%\"'\n\
                         \tstdout \"%SIPLogsDirectory%handles.log\" in objects/\n"
                    )
                    .unwrap()
                    .0
            );
            Ok(())
        }
        #[test]
        fn test_choice() -> Result<()> {
            let text = "choice {\n\
                option yes \"Yes\" { BindPIDs = \"True\" }\n\
                option no \"No\" -> @store { BindPIDs = False }\n\
                option later \"Decide later\"\n\
            }";
            assert_eq!(
                TaskSpec::Choice(vec![
                    ChoiceOption {
                        name: "yes",
                        description: "Yes",
                        next: None,
                        assignments: vec![("BindPIDs", "True")],
                    },
                    ChoiceOption {
                        name: "no",
                        description: "No",
                        next: Some(Target::Link("store")),
                        assignments: vec![("BindPIDs", "False")],
                    },
                    ChoiceOption {
                        name: "later",
                        description: "Decide later",
                        next: None,
                        assignments: vec![],
                    },
                ]),
                super::task_spec().easy_parse(text).unwrap().0
            );
            Ok(())
        }
        #[test]
        fn test_builtin_tasks() -> Result<()> {
            assert_eq!(
                TaskSpec::Set {
                    var: "resumeAfterNormalization",
                    value: SetValue::Link("approve"),
                },
                super::task_spec()
                    .easy_parse("set resumeAfterNormalization = @approve")
                    .unwrap()
                    .0
            );
            assert_eq!(
                TaskSpec::Set {
                    var: "IncludeDirs",
                    value: SetValue::Literal("True"),
                },
                super::task_spec().easy_parse("set IncludeDirs = \"True\"").unwrap().0
            );
            assert_eq!(
                TaskSpec::Pull { var: "resumeAfterNormalization" },
                super::task_spec().easy_parse("pull resumeAfterNormalization").unwrap().0
            );
            assert_eq!(
                TaskSpec::Magic("approve"),
                super::task_spec().easy_parse("magic @approve").unwrap().0
            );
            assert_eq!(
                TaskSpec::GotoMagic,
                super::task_spec().easy_parse("goto-magic").unwrap().0
            );
            Ok(())
        }
    }
}

mod link {

    use super::literal::{exit_code, literal};
    use super::prelude::*;
    use super::target::target;
    use super::task::task_spec;
    use super::util::{arrow, braces, ident, keyword, lex};
    use crate::ast::{LinkBlock, LinkStatement};

    p! {
        group() -> LinkStatement<'a>, {
            lex(keyword("group")).with(lex(literal())).map(LinkStatement::Group)
        }
    }

    p! {
        exit() -> LinkStatement<'a>, {
            lex(keyword("exit"))
                .with(lex(exit_code()))
                .skip(arrow())
                .and(lex(target()))
                .map(|(code, target)| LinkStatement::Exit(code, target))
        }
    }

    p! {
        default_next() -> LinkStatement<'a>, {
            lex(keyword("default"))
                .with(arrow())
                .with(lex(target()))
                .map(LinkStatement::Default)
        }
    }

    p! {
        statement() -> LinkStatement<'a>, {
            choice!(
                group(),
                exit(),
                default_next(),
                task_spec().map(LinkStatement::Task)
            )
        }
    }

    p! {
        link_block() -> LinkBlock<'a>, {
            lex(keyword("link"))
                .with(lex(ident()))
                .and(braces(many::<Vec<_>, _, _>(statement())))
                .map(|(name, statements)| LinkBlock { name, statements })
        }
    }

    #[cfg(test)]
    mod test {
        use crate::ast::{Exec, LinkBlock, LinkStatement, Scope, Target, TaskSpec};
        use anyhow::Result;
        use combine::EasyParser;
        #[test]
        fn test_link_block() -> Result<()> {
            let text = "link verify {\n\
                # checks the transfer structure\n\
                group \"Verify transfer compliance\"\n\
                run per-unit verifyTransfer \"%SIPDirectory%\"\n\
                exit 0 -> @next_step\n\
                exit 1 -> failed\n\
                default -> done\n\
            }";
            assert_eq!(
                LinkBlock {
                    name: "verify",
                    statements: vec![
                        LinkStatement::Group("Verify transfer compliance"),
                        LinkStatement::Task(TaskSpec::Run(Exec {
                            scope: Scope::PerUnit,
                            exec: "verifyTransfer",
                            args: "%SIPDirectory%",
                            modifiers: vec![],
                        })),
                        LinkStatement::Exit(0, Target::Link("next_step")),
                        LinkStatement::Exit(1, Target::Failed),
                        LinkStatement::Default(Target::Done),
                    ],
                },
                super::link_block().easy_parse(text).unwrap().0
            );
            Ok(())
        }
        #[test]
        fn test_empty_link_block() -> Result<()> {
            assert_eq!(
                LinkBlock { name: "noop", statements: vec![] },
                super::link_block().easy_parse("link noop {}").unwrap().0
            );
            Ok(())
        }
    }
}

mod workflow_file {

    use super::link::link_block;
    use super::prelude::*;
    use super::target::link_ref;
    use super::task::assignments;
    use super::util::{arrow, ident, keyword, lex, whitespace};
    use crate::ast::Item;

    p! {
        start() -> Item<'a>, {
            lex(keyword("start"))
                .with(lex(ident()))
                .skip(arrow())
                .and(lex(link_ref()))
                .map(|(kind, link)| Item::Start(kind, link))
        }
    }

    p! {
        answers() -> Item<'a>, {
            lex(keyword("answers")).with(assignments()).map(Item::Answers)
        }
    }

    p! {
        item() -> Item<'a>, {
            choice!(
                start(),
                link_block().map(Item::Link),
                answers()
            )
        }
    }

    p! {
        items() -> Vec<Item<'a>>, {
            optional(whitespace())
                .with(many(item()))
                .skip(eof())
        }
    }
}

mod words {

    use super::literal::{double_quoted, single_quoted};
    use super::prelude::*;
    use combine::parser::char::spaces;

    p! {
        bare_part() -> &'a str, {
            recognize(skip_many1(satisfy(|c: char| {
                !c.is_whitespace() && c != '"' && c != '\''
            })))
        }
    }

    p! {
        word_part() -> &'a str, {
            choice!(double_quoted(), single_quoted(), bare_part())
        }
    }

    // adjacent quoted and unquoted parts make up one word, like in a shell:
    p! {
        word() -> String, {
            many1::<Vec<&'a str>, _, _>(word_part()).map(|parts| parts.concat())
        }
    }

    p! {
        words() -> Vec<String>, {
            spaces().with(many(word().skip(spaces()))).skip(eof())
        }
    }
}

mod template {

    use super::prelude::*;
    use super::util::ident;
    use crate::ast::Segment;

    p! {
        var_segment() -> Segment<'a>, {
            attempt(char('%').with(ident()).skip(char('%'))).map(Segment::Var)
        }
    }

    p! {
        text_segment() -> Segment<'a>, {
            recognize(skip_many1(none_of("%".chars()))).map(Segment::Literal)
        }
    }

    // a '%' that doesn't open a variable is just text:
    p! {
        percent_segment() -> Segment<'a>, {
            recognize(char('%')).map(Segment::Literal)
        }
    }

    p! {
        segments() -> Vec<Segment<'a>>, {
            many(choice!(var_segment(), text_segment(), percent_segment())).skip(eof())
        }
    }
}

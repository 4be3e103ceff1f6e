// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Recursive-descent parser for the manager's command language.

use super::{Command, OptionChange};
use crate::errors::ErrorCode;
use crate::instance_options::LogKind;
use crate::option_file::NamedOption;

type ParseResult<T> = Result<T, ErrorCode>;

/// Parses one query. Keywords are case-insensitive; a trailing `;` is
/// accepted.
pub fn parse(query: &str) -> ParseResult<Command> {
    let mut p = Parser::new(query);
    let command = p.command()?;
    p.finish()?;
    Ok(command)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '$')
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// Consumes the run of characters matching `pred`.
    fn take_while<P>(&mut self, pred: P) -> String
    where
        P: Fn(char) -> bool,
    {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        self.chars
            .get(start..self.pos)
            .unwrap_or_default()
            .iter()
            .collect()
    }

    fn word(&mut self) -> Option<String> {
        self.skip_ws();
        let word = self.take_while(is_word_char);
        (!word.is_empty()).then_some(word)
    }

    /// Consumes `kw` if it is the next word.
    fn keyword(&mut self, kw: &str) -> bool {
        let saved = self.pos;
        match self.word() {
            Some(w) if w.eq_ignore_ascii_case(kw) => true,
            _ => {
                self.pos = saved;
                false
            }
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> ParseResult<()> {
        if self.keyword(kw) { Ok(()) } else { Err(ErrorCode::SyntaxError) }
    }

    fn punct(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn name(&mut self) -> ParseResult<String> {
        self.word().ok_or(ErrorCode::SyntaxError)
    }

    /// A quoted string or a bare run up to whitespace, `,` or `;`.
    fn value(&mut self) -> ParseResult<String> {
        self.skip_ws();
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let value = self.take_while(|c| c != quote);
                if self.peek().is_none() {
                    return Err(ErrorCode::SyntaxError);
                }
                self.pos += 1;
                Ok(value)
            }
            _ => {
                let value = self.take_while(|c| !c.is_whitespace() && c != ',' && c != ';');
                if value.is_empty() {
                    return Err(ErrorCode::SyntaxError);
                }
                Ok(value)
            }
        }
    }

    fn number(&mut self) -> ParseResult<u64> {
        self.skip_ws();
        let digits = self.take_while(|c| c.is_ascii_digit());
        digits.parse().map_err(|_| ErrorCode::SyntaxError)
    }

    fn finish(&mut self) -> ParseResult<()> {
        self.punct(';');
        self.skip_ws();
        if self.peek().is_none() { Ok(()) } else { Err(ErrorCode::SyntaxError) }
    }

    fn command(&mut self) -> ParseResult<Command> {
        if self.keyword("show") {
            return self.show();
        }
        if self.keyword("start") {
            self.expect_keyword("instance")?;
            return Ok(Command::StartInstance(self.name()?));
        }
        if self.keyword("stop") {
            self.expect_keyword("instance")?;
            return Ok(Command::StopInstance(self.name()?));
        }
        if self.keyword("flush") {
            self.expect_keyword("instances")?;
            return Ok(Command::FlushInstances);
        }
        if self.keyword("create") {
            self.expect_keyword("instance")?;
            let name = self.name()?;
            let options = self.create_options()?;
            return Ok(Command::CreateInstance { name, options });
        }
        if self.keyword("drop") {
            self.expect_keyword("instance")?;
            return Ok(Command::DropInstance(self.name()?));
        }
        if self.keyword("set") {
            return Ok(Command::SetOptions(self.option_changes(true)?));
        }
        if self.keyword("unset") {
            return Ok(Command::UnsetOptions(self.option_changes(false)?));
        }
        Err(ErrorCode::SyntaxError)
    }

    fn show(&mut self) -> ParseResult<Command> {
        if self.keyword("instances") {
            return Ok(Command::ShowInstances);
        }
        if self.keyword("instance") {
            if self.keyword("status") {
                return Ok(Command::ShowInstanceStatus(self.name()?));
            }
            if self.keyword("options") {
                return Ok(Command::ShowInstanceOptions(self.name()?));
            }
        }
        let name = self.name()?;
        self.expect_keyword("log")?;
        if self.keyword("files") {
            return Ok(Command::ShowLogFiles(name));
        }
        let kind = if self.keyword("error") {
            LogKind::Error
        } else if self.keyword("slow") {
            LogKind::Slow
        } else if self.keyword("general") {
            LogKind::General
        } else {
            return Err(ErrorCode::SyntaxError);
        };
        let size = self.number()?;
        let offset = if self.punct(',') { self.number()? } else { 0 };
        Ok(Command::ShowLog {
            name,
            kind,
            size,
            offset,
        })
    }

    fn option(&mut self, allow_value: bool) -> ParseResult<NamedOption> {
        let name = self.name()?;
        if allow_value && self.punct('=') {
            Ok(NamedOption::new(name, Some(self.value()?)))
        } else {
            Ok(NamedOption::flag(name))
        }
    }

    fn create_options(&mut self) -> ParseResult<Vec<NamedOption>> {
        let mut options = Vec::new();
        self.skip_ws();
        if matches!(self.peek(), None | Some(';')) {
            return Ok(options);
        }
        loop {
            options.push(self.option(true)?);
            if !self.punct(',') {
                return Ok(options);
            }
        }
    }

    fn option_changes(&mut self, allow_value: bool) -> ParseResult<Vec<OptionChange>> {
        let mut changes = Vec::new();
        loop {
            let instance = self.name()?;
            if !self.punct('.') {
                return Err(ErrorCode::SyntaxError);
            }
            let option = self.option(allow_value)?;
            changes.push(OptionChange { instance, option });
            if !self.punct(',') {
                return Ok(changes);
            }
        }
    }
}

//! Recursive-descent parser.
//!
//! One method per production. Productions record highlights and
//! autocomplete markers into the [`ParseContext`] as they consume tokens.
//! A stage that fails to parse is dropped, its error recorded, and parsing
//! resumes at the next pipe so later stages still produce output.

use super::ast::*;
use super::context::{HighlightKind, MarkerId, ParseContext, SuggestionKind};
use super::token::{Command, Keyword, Token, TokenKind};
use crate::error::ParseError;

type PResult<T> = std::result::Result<T, ParseError>;

pub struct Parser<'c> {
    tokens: Vec<Token>,
    pos: usize,
    /// End offset of the last consumed token.
    prev_end: usize,
    ctx: &'c mut ParseContext,
    errors: Vec<ParseError>,
}

impl<'c> Parser<'c> {
    pub fn new(mut tokens: Vec<Token>, ctx: &'c mut ParseContext) -> Self {
        if tokens.last().map(|t| &t.kind) != Some(&TokenKind::Eof) {
            let end = tokens.last().map_or(0, |t| t.span.end);
            tokens.push(Token::new(
                TokenKind::Eof,
                super::token::Span::new(end, end),
                "",
            ));
        }
        Self {
            tokens,
            pos: 0,
            prev_end: 0,
            ctx,
            errors: Vec::new(),
        }
    }

    /// Parse a full query. Returns the (possibly partial) AST and every
    /// error encountered.
    pub fn parse_query(mut self) -> (Query, Vec<ParseError>) {
        let mut query = Query::default();

        if let Err(err) = self.head(&mut query) {
            self.errors.push(err);
            self.synchronize();
        }

        while !self.is_at_end() {
            if !self.check(&TokenKind::Pipe) {
                let err = self.unexpected(&["'|'"]);
                self.errors.push(err);
                self.synchronize();
                continue;
            }
            self.advance();
            self.suggest(SuggestionKind::Commands);

            match self.stage() {
                Ok(stage) => {
                    query.pipeline.push(stage);
                    if !self.check(&TokenKind::Pipe) && !self.is_at_end() {
                        let err = self.unexpected(&["'|'", "end of input"]);
                        self.errors.push(err);
                        self.synchronize();
                    }
                }
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
        }

        (query, self.errors)
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.pos += 1;
            self.prev_end = token.span.end;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek().kind == *kind
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek().is_keyword(keyword)
    }

    fn match_token(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&[what]))
        }
    }

    fn unexpected(&self, expected: &[&str]) -> ParseError {
        let token = self.peek();
        expected.iter().fold(
            ParseError::new(format!("unexpected {}", token.kind.describe()), token.span),
            |err, e| err.expected(*e),
        )
    }

    /// Skip to the next pipe (not consumed) or end of input.
    fn synchronize(&mut self) {
        while !self.is_at_end() && !self.check(&TokenKind::Pipe) {
            self.advance();
        }
    }

    fn highlight(&mut self, kind: HighlightKind, token: &Token) {
        self.ctx.highlight(kind, token.span.start, token.span.end);
    }

    /// Consume an operator-like token and highlight it.
    fn operator(&mut self) -> Token {
        let token = self.advance();
        self.highlight(HighlightKind::Operator, &token);
        token
    }

    fn keyword(&mut self) -> Token {
        let token = self.advance();
        self.highlight(HighlightKind::Keyword, &token);
        token
    }

    // =========================================================================
    // Suggestion markers
    // =========================================================================

    /// Open a marker describing the current token.
    fn suggest(&mut self, kind: SuggestionKind) -> MarkerId {
        let id = self.ctx.open(kind, self.prev_end);
        self.settle(id);
        id
    }

    /// Close a marker at the start of the token after the current one. A
    /// marker whose token runs into end of input stays open.
    fn settle(&mut self, id: MarkerId) {
        let current = self.peek();
        let next = self.peek_nth(1);
        let to = match (&current.kind, &next.kind) {
            (TokenKind::Eof, _) => None,
            (_, TokenKind::Eof) if current.span.end == next.span.start => None,
            _ => Some(next.span.start),
        };
        self.ctx.close(id, to);
    }

    // =========================================================================
    // Head: pre-filters and search
    // =========================================================================

    fn head(&mut self, query: &mut Query) -> PResult<()> {
        loop {
            self.suggest(SuggestionKind::Params);
            if !self.at_pre_filter() {
                break;
            }
            let filter = self.pre_filter()?;
            query.pre_filters.push(filter);
        }

        if !self.check(&TokenKind::Pipe) && !self.is_at_end() {
            query.search = Some(self.search()?);
        }
        Ok(())
    }

    fn at_pre_filter(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Identifier(_))
            && matches!(
                self.peek_nth(1).kind,
                TokenKind::Equal | TokenKind::NotEqual
            )
    }

    fn pre_filter(&mut self) -> PResult<PreFilter> {
        let key_token = self.advance();
        self.highlight(HighlightKind::ParamKey, &key_token);
        let key = key_token.text.clone();

        let op = match self.operator().kind {
            TokenKind::NotEqual => PreFilterOp::NotEq,
            _ => PreFilterOp::Eq,
        };

        self.suggest(SuggestionKind::ParamValues { key: key.clone() });
        let value = match &self.peek().kind {
            TokenKind::Identifier(s) | TokenKind::String(s) | TokenKind::Backtick(s) => s.clone(),
            TokenKind::Number(_) => self.peek().text.clone(),
            _ => return Err(self.unexpected(&["value"])),
        };
        let value_token = self.advance();
        self.highlight(HighlightKind::ParamValue, &value_token);

        Ok(PreFilter { key, op, value })
    }

    /// `searchFactor (AND search | OR search | search)?`
    fn search(&mut self) -> PResult<SearchNode> {
        let left = self.search_factor()?;

        match &self.peek().kind {
            TokenKind::Keyword(Keyword::SearchAnd) => {
                self.keyword();
                Ok(SearchNode::and(left, self.search()?))
            }
            TokenKind::Keyword(Keyword::SearchOr) => {
                self.keyword();
                Ok(SearchNode::or(left, self.search()?))
            }
            TokenKind::Identifier(_)
            | TokenKind::Number(_)
            | TokenKind::String(_)
            | TokenKind::Backtick(_)
            | TokenKind::LParen => Ok(SearchNode::and(left, self.search()?)),
            _ => Ok(left),
        }
    }

    fn search_factor(&mut self) -> PResult<SearchNode> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::LParen => {
                self.advance();
                let inner = self.search()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Identifier(term) => {
                self.advance();
                Ok(SearchNode::term(term))
            }
            TokenKind::Number(_) => {
                self.advance();
                self.highlight(HighlightKind::Number, &token);
                Ok(SearchNode::term(token.text))
            }
            TokenKind::String(ref phrase) | TokenKind::Backtick(ref phrase) => {
                self.advance();
                self.highlight(HighlightKind::String, &token);
                Ok(SearchNode::phrase(phrase.clone()))
            }
            _ => Err(self.unexpected(&["search term"])),
        }
    }

    // =========================================================================
    // Stages
    // =========================================================================

    fn stage(&mut self) -> PResult<Stage> {
        let token = self.peek().clone();
        let command = match &token.kind {
            TokenKind::Command(command) => *command,
            TokenKind::Identifier(name) => {
                return Err(Command::ALL.iter().fold(
                    ParseError::new(format!("unknown command '{}'", name), token.span),
                    |err, c| err.expected(c.as_str()),
                ));
            }
            _ => return Err(self.unexpected(&["command"])),
        };
        self.advance();
        self.highlight(HighlightKind::Command, &token);

        match command {
            Command::Table => self.table().map(Stage::Table),
            Command::Stats => self.stats().map(Stage::Stats),
            Command::Regex => self.regex().map(Stage::Regex),
            Command::Sort => self.sort().map(Stage::Sort),
            Command::Where => self.logical_expr().map(|expr| Stage::Where(WhereStage { expr })),
            Command::TimeChart => self.timechart().map(Stage::TimeChart),
            Command::Eval => self.eval().map(Stage::Eval),
        }
    }

    fn column(&mut self) -> PResult<String> {
        self.name(HighlightKind::Column, "column")
    }

    fn name(&mut self, kind: HighlightKind, what: &str) -> PResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let token = self.advance();
                self.highlight(kind, &token);
                Ok(name)
            }
            _ => Err(self.unexpected(&[what])),
        }
    }

    fn alias(&mut self) -> PResult<Option<String>> {
        if !self.check_keyword(Keyword::As) {
            return Ok(None);
        }
        self.keyword();
        self.name(HighlightKind::Column, "alias").map(Some)
    }

    fn table(&mut self) -> PResult<TableStage> {
        let mut columns = Vec::new();
        loop {
            self.suggest(SuggestionKind::Columns);
            let column = self.column()?;
            let alias = self.alias()?;
            columns.push(TableColumn { column, alias });
            if self.match_token(&TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(TableStage { columns })
    }

    fn stats(&mut self) -> PResult<StatsStage> {
        let (aggregations, by) = self.aggregations()?;
        Ok(StatsStage { aggregations, by })
    }

    /// `aggCall ("," aggCall)* [by column ("," column)*]`, shared by stats
    /// and timechart.
    fn aggregations(&mut self) -> PResult<(Vec<AggCall>, Vec<String>)> {
        let by_marker = self
            .ctx
            .open(SuggestionKind::keywords(&["by"]), self.prev_end);
        self.ctx.disable(by_marker);

        let mut aggregations = Vec::new();
        loop {
            self.suggest(SuggestionKind::AggregationFunctions);
            aggregations.push(self.agg_call()?);
            self.ctx.enable(by_marker);
            self.ctx.reset(by_marker, self.prev_end);
            if self.match_token(&TokenKind::Comma).is_none() {
                break;
            }
        }
        self.settle(by_marker);

        let mut by = Vec::new();
        if self.check_keyword(Keyword::By) {
            self.keyword();
            loop {
                self.suggest(SuggestionKind::Columns);
                by.push(self.column()?);
                if self.match_token(&TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        Ok((aggregations, by))
    }

    fn agg_call(&mut self) -> PResult<AggCall> {
        let token = self.peek().clone();
        let func = match &token.kind {
            TokenKind::Identifier(name) => match AggFunc::from_name(name) {
                Some(func) => func,
                None => {
                    return Err(AggFunc::ALL.iter().fold(
                        ParseError::new(
                            format!("unknown aggregation function '{}'", name),
                            token.span,
                        ),
                        |err, f| err.expected(f.as_str()),
                    ));
                }
            },
            _ => return Err(self.unexpected(&["aggregation function"])),
        };
        self.advance();
        self.highlight(HighlightKind::Function, &token);

        self.expect(&TokenKind::LParen, "'('")?;
        self.suggest(SuggestionKind::Columns);
        let column = match self.peek().kind {
            TokenKind::Identifier(_) => Some(self.column()?),
            _ => None,
        };
        self.expect(&TokenKind::RParen, "')'")?;

        if column.is_none() && func != AggFunc::Count {
            return Err(ParseError::new(
                format!("{}() requires a column", func.as_str()),
                token.span,
            )
            .expected("column"));
        }

        let alias = self.alias()?;
        Ok(AggCall {
            func,
            column,
            alias,
        })
    }

    fn regex(&mut self) -> PResult<RegexStage> {
        self.suggest(SuggestionKind::keywords(&["field"]));
        let mut field = None;
        if self.check_keyword(Keyword::Field) {
            self.keyword();
            let eq = self.expect(&TokenKind::Equal, "'='")?;
            self.highlight(HighlightKind::Operator, &eq);
            self.suggest(SuggestionKind::Columns);
            field = Some(self.column()?);
        }

        let token = self.peek().clone();
        let pattern = match token.kind {
            TokenKind::Backtick(ref pattern) | TokenKind::String(ref pattern) => pattern.clone(),
            _ => return Err(self.unexpected(&["regex pattern"])),
        };
        self.advance();
        self.highlight(HighlightKind::Regex, &token);

        if let Err(err) = regex::Regex::new(&pattern) {
            return Err(ParseError::new(format!("invalid regex: {}", err), token.span));
        }
        Ok(RegexStage { field, pattern })
    }

    fn sort(&mut self) -> PResult<SortStage> {
        let mut keys = Vec::new();
        loop {
            self.suggest(SuggestionKind::Columns);
            let column = self.column()?;
            self.suggest(SuggestionKind::keywords(&["asc", "desc"]));
            let direction = if self.check_keyword(Keyword::Desc) {
                self.keyword();
                SortDirection::Desc
            } else {
                if self.check_keyword(Keyword::Asc) {
                    self.keyword();
                }
                SortDirection::Asc
            };
            keys.push(SortKey { column, direction });
            if self.match_token(&TokenKind::Comma).is_none() {
                break;
            }
        }
        Ok(SortStage { keys })
    }

    fn eval(&mut self) -> PResult<EvalStage> {
        self.suggest(SuggestionKind::Columns);
        let target = self.column()?;
        let eq = self.expect(&TokenKind::Equal, "'='")?;
        self.highlight(HighlightKind::Operator, &eq);
        let expr = self.logical_expr()?;
        Ok(EvalStage { target, expr })
    }

    fn timechart(&mut self) -> PResult<TimeChartStage> {
        let mut span = None;
        let mut time_col = None;
        let mut max_groups = None;

        loop {
            self.suggest(SuggestionKind::keywords(&["span", "timeCol", "maxGroups"]));
            let option = match self.peek().kind {
                TokenKind::Keyword(k @ (Keyword::Span | Keyword::TimeCol | Keyword::MaxGroups)) => k,
                _ => break,
            };
            self.keyword();
            let eq = self.expect(&TokenKind::Equal, "'='")?;
            self.highlight(HighlightKind::Operator, &eq);

            match option {
                Keyword::Span => span = Some(self.duration()?),
                Keyword::TimeCol => {
                    self.suggest(SuggestionKind::Columns);
                    time_col = Some(self.column()?);
                }
                _ => max_groups = Some(self.positive_integer()?),
            }
        }

        let (aggregations, by) = self.aggregations()?;
        Ok(TimeChartStage {
            span,
            time_col,
            max_groups,
            aggregations,
            by,
        })
    }

    fn duration(&mut self) -> PResult<TimeSpan> {
        let token = self.peek().clone();
        if !matches!(token.kind, TokenKind::Identifier(_) | TokenKind::Number(_)) {
            return Err(self.unexpected(&["duration"]));
        }
        let span = token
            .text
            .parse::<TimeSpan>()
            .map_err(|message| ParseError::new(message, token.span).expected("duration"))?;
        self.advance();
        self.highlight(HighlightKind::Number, &token);
        Ok(span)
    }

    fn positive_integer(&mut self) -> PResult<usize> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(n) if n >= 1.0 && n.fract() == 0.0 => {
                self.advance();
                self.highlight(HighlightKind::Number, &token);
                Ok(n as usize)
            }
            TokenKind::Number(_) => Err(ParseError::new(
                format!("expected a positive integer, found {}", token.text),
                token.span,
            )),
            _ => Err(self.unexpected(&["number"])),
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// `unit (("&&" | "||") logicalExpr)?`, right-associative without
    /// precedence between the two operators.
    fn logical_expr(&mut self) -> PResult<Expr> {
        let left = self.unit()?;
        let op = match self.peek().kind {
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::OrOr => BinaryOp::Or,
            _ => return Ok(left),
        };
        self.operator();
        let right = self.logical_expr()?;
        Ok(Expr::binary(op, left, right))
    }

    fn unit(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Bang) {
            self.operator();
            return Ok(Expr::Not(Box::new(self.unit()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let left = self.arith()?;
        let op = match self.peek().kind {
            TokenKind::DoubleEqual => BinaryOp::Eq,
            TokenKind::NotEqual => BinaryOp::NotEq,
            TokenKind::Greater => BinaryOp::Gt,
            TokenKind::GreaterEqual => BinaryOp::GtEq,
            TokenKind::Less => BinaryOp::Lt,
            TokenKind::LessEqual => BinaryOp::LtEq,
            TokenKind::Keyword(Keyword::In) => return self.in_list(left),
            _ => return Ok(left),
        };
        self.operator();
        let right = self.arith()?;
        Ok(Expr::binary(op, left, right))
    }

    fn in_list(&mut self, left: Expr) -> PResult<Expr> {
        self.operator();
        self.expect(&TokenKind::LBracket, "'['")?;
        let mut list = Vec::new();
        loop {
            list.push(self.literal()?);
            if self.match_token(&TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::In {
            expr: Box::new(left),
            list,
        })
    }

    fn literal(&mut self) -> PResult<Literal> {
        let token = self.peek().clone();
        let literal = match &token.kind {
            TokenKind::Number(n) => {
                self.highlight(HighlightKind::Number, &token);
                Literal::Number(*n)
            }
            TokenKind::Minus => match self.peek_nth(1).kind {
                TokenKind::Number(n) => {
                    self.operator();
                    let number = self.peek().clone();
                    self.highlight(HighlightKind::Number, &number);
                    Literal::Number(-n)
                }
                _ => return Err(self.unexpected(&["literal"])),
            },
            TokenKind::String(s) | TokenKind::Backtick(s) => {
                self.highlight(HighlightKind::String, &token);
                Literal::String(s.clone())
            }
            TokenKind::Keyword(Keyword::True) => {
                self.highlight(HighlightKind::Boolean, &token);
                Literal::Boolean(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.highlight(HighlightKind::Boolean, &token);
                Literal::Boolean(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.highlight(HighlightKind::Keyword, &token);
                Literal::Null
            }
            _ => return Err(self.unexpected(&["literal"])),
        };
        self.advance();
        Ok(literal)
    }

    fn arith(&mut self) -> PResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.operator();
            let right = self.term()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> PResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            self.operator();
            let right = self.factor()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> PResult<Expr> {
        self.suggest(SuggestionKind::Columns);
        self.suggest(SuggestionKind::Functions);

        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Minus => {
                self.operator();
                Ok(Expr::Neg(Box::new(self.factor()?)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.logical_expr()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Identifier(name) => {
                if self.peek_nth(1).kind == TokenKind::LParen {
                    self.call(&token, name)
                } else {
                    self.advance();
                    self.highlight(HighlightKind::Column, &token);
                    Ok(Expr::Column(name.clone()))
                }
            }
            TokenKind::Number(_)
            | TokenKind::String(_)
            | TokenKind::Backtick(_)
            | TokenKind::Keyword(Keyword::True | Keyword::False | Keyword::Null) => {
                self.literal().map(Expr::Literal)
            }
            _ => Err(self.unexpected(&["expression"])),
        }
    }

    fn call(&mut self, name_token: &Token, name: &str) -> PResult<Expr> {
        let Some(func) = Function::from_name(name) else {
            return Err(Function::ALL.iter().fold(
                ParseError::new(format!("unknown function '{}'", name), name_token.span),
                |err, f| err.expected(f.as_str()),
            ));
        };
        self.advance();
        self.highlight(HighlightKind::Function, name_token);
        self.expect(&TokenKind::LParen, "'('")?;

        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.logical_expr()?);
                if self.match_token(&TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        let (min, max) = func.arity();
        if args.len() < min || max.map_or(false, |max| args.len() > max) {
            let wanted = match max {
                Some(max) if max == min => min.to_string(),
                Some(max) => format!("{} to {}", min, max),
                None => format!("at least {}", min),
            };
            return Err(ParseError::new(
                format!("{}() takes {} argument(s), got {}", name, wanted, args.len()),
                name_token.span,
            ));
        }

        if func == Function::Match {
            if let Some(Expr::Literal(Literal::String(pattern))) = args.get(1) {
                if let Err(err) = regex::Regex::new(pattern) {
                    return Err(ParseError::new(
                        format!("invalid regex: {}", err),
                        name_token.span,
                    ));
                }
            }
        }

        Ok(Expr::Call { func, args })
    }
}

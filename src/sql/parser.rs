//! # Parser
//!
//! Recursive-descent parser over the lexer's token stream. Produces
//! unannotated AST nodes; all name and type resolution happens in the
//! semantic pass. The input may hold several statements separated by
//! semicolons; each comes back with its own source text slice.

use eyre::{bail, ensure, Result};

use super::ast::{
    BinaryOp, CreateTableStmt, DeleteStmt, DropTableStmt, Expr, InsertStmt, OrderBy,
    ParsedStatement, Projection, SelectStmt, Statement, UpdateStmt,
};
use super::lexer::{Keyword, Lexer, Token};
use crate::types::DataType;

struct Parser<'a> {
    input: &'a str,
    /// Token stream plus each token's byte offset, with a trailing Eof.
    tokens: Vec<(Token<'a>, usize)>,
    pos: usize,
}

/// Parses `input` into its statements.
pub fn parse_sql(input: &str) -> Result<Vec<ParsedStatement>> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let before = lexer.offset();
        let token = lexer.next_token()?;
        let after = lexer.offset();
        // token text begins where the lexer stopped skipping blanks
        let start = after - token_width(input, before, after);
        tokens.push((token, start));
        if matches!(tokens.last().unwrap().0, Token::Eof) {
            break;
        }
    }

    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
    };
    parser.parse_statements()
}

/// Width in bytes of the token that ended at `after`, given the scan
/// started at `before` (leading whitespace/comments excluded).
fn token_width(input: &str, before: usize, after: usize) -> usize {
    let scanned = &input[before..after];
    scanned.trim_start().len().min(after - before)
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token<'a> {
        &self.tokens[self.pos].0
    }

    fn peek_offset(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Token<'a> {
        let tok = self.tokens[self.pos].0;
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: Token<'_>, what: &str) -> Result<()> {
        let tok = self.advance();
        ensure!(tok == expected, "expected {what}, found {tok:?}");
        Ok(())
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<()> {
        let tok = self.advance();
        ensure!(
            tok == Token::Keyword(kw),
            "expected {kw:?}, found {tok:?}"
        );
        Ok(())
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if *self.peek() == Token::Keyword(kw) {
            self.advance();
            return true;
        }
        false
    }

    fn ident(&mut self, what: &str) -> Result<String> {
        match self.advance() {
            Token::Ident(name) => Ok(name.to_string()),
            other => bail!("expected {what}, found {other:?}"),
        }
    }

    fn parse_statements(&mut self) -> Result<Vec<ParsedStatement>> {
        let mut statements = Vec::new();
        loop {
            while *self.peek() == Token::Semicolon {
                self.advance();
            }
            if *self.peek() == Token::Eof {
                return Ok(statements);
            }

            let start = self.peek_offset();
            let stmt = self.parse_statement()?;
            let end = self.peek_offset();
            let sql = self.input[start..end].trim().to_string();

            match self.peek() {
                Token::Semicolon => {
                    self.advance();
                }
                Token::Eof => {}
                other => bail!("expected ';' between statements, found {other:?}"),
            }
            statements.push(ParsedStatement { stmt, sql });
        }
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.peek() {
            Token::Keyword(Keyword::Select) => self.parse_select().map(Statement::Select),
            Token::Keyword(Keyword::Insert) => self.parse_insert().map(Statement::Insert),
            Token::Keyword(Keyword::Update) => self.parse_update().map(Statement::Update),
            Token::Keyword(Keyword::Delete) => self.parse_delete().map(Statement::Delete),
            Token::Keyword(Keyword::Create) => {
                self.parse_create_table().map(Statement::CreateTable)
            }
            Token::Keyword(Keyword::Drop) => self.parse_drop_table().map(Statement::DropTable),
            Token::Keyword(Keyword::Begin) => {
                self.advance();
                Ok(Statement::Begin)
            }
            Token::Keyword(Keyword::Commit) => {
                self.advance();
                Ok(Statement::Commit)
            }
            Token::Keyword(Keyword::Rollback) => {
                self.advance();
                Ok(Statement::Rollback)
            }
            other => bail!("expected a statement, found {other:?}"),
        }
    }

    fn parse_select(&mut self) -> Result<SelectStmt> {
        self.expect_keyword(Keyword::Select)?;

        let projection = if *self.peek() == Token::Star {
            self.advance();
            Projection::Star
        } else {
            let mut columns = vec![self.ident("a column name")?];
            while *self.peek() == Token::Comma {
                self.advance();
                columns.push(self.ident("a column name")?);
            }
            Projection::Columns(columns)
        };

        self.expect_keyword(Keyword::From)?;
        let table = self.ident("a table name")?;

        let where_clause = self.parse_where_clause()?;

        let order_by = if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            let column = self.ident("an ORDER BY column")?;
            let desc = if self.eat_keyword(Keyword::Desc) {
                true
            } else {
                self.eat_keyword(Keyword::Asc);
                false
            };
            Some(OrderBy { column, desc })
        } else {
            None
        };

        Ok(SelectStmt {
            table,
            projection,
            where_clause,
            order_by,
            sem: None,
        })
    }

    fn parse_insert(&mut self) -> Result<InsertStmt> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let table = self.ident("a table name")?;

        self.expect(Token::LParen, "'('")?;
        let mut columns = vec![self.ident("a column name")?];
        while *self.peek() == Token::Comma {
            self.advance();
            columns.push(self.ident("a column name")?);
        }
        self.expect(Token::RParen, "')'")?;

        self.expect_keyword(Keyword::Values)?;
        self.expect(Token::LParen, "'('")?;
        let mut values = vec![self.parse_expr()?];
        while *self.peek() == Token::Comma {
            self.advance();
            values.push(self.parse_expr()?);
        }
        self.expect(Token::RParen, "')'")?;

        Ok(InsertStmt {
            table,
            columns,
            values,
            sem: None,
        })
    }

    fn parse_update(&mut self) -> Result<UpdateStmt> {
        self.expect_keyword(Keyword::Update)?;
        let table = self.ident("a table name")?;
        self.expect_keyword(Keyword::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.ident("a column name")?;
            self.expect(Token::Eq, "'='")?;
            let value = self.parse_expr()?;
            assignments.push((column, value));
            if *self.peek() != Token::Comma {
                break;
            }
            self.advance();
        }

        let where_clause = self.parse_where_clause()?;

        Ok(UpdateStmt {
            table,
            assignments,
            where_clause,
            sem: None,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let table = self.ident("a table name")?;
        let where_clause = self.parse_where_clause()?;
        Ok(DeleteStmt {
            table,
            where_clause,
        })
    }

    fn parse_create_table(&mut self) -> Result<CreateTableStmt> {
        self.expect_keyword(Keyword::Create)?;
        self.expect_keyword(Keyword::Table)?;
        let table = self.ident("a table name")?;

        self.expect(Token::LParen, "'('")?;
        let mut columns = Vec::new();
        loop {
            let name = self.ident("a column name")?;
            let ty = self.parse_data_type()?;
            columns.push((name, ty));
            if *self.peek() != Token::Comma {
                break;
            }
            self.advance();
        }
        self.expect(Token::RParen, "')'")?;

        Ok(CreateTableStmt { table, columns })
    }

    fn parse_drop_table(&mut self) -> Result<DropTableStmt> {
        self.expect_keyword(Keyword::Drop)?;
        self.expect_keyword(Keyword::Table)?;
        let table = self.ident("a table name")?;
        Ok(DropTableStmt { table })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        match self.advance() {
            Token::Keyword(Keyword::Int) | Token::Keyword(Keyword::Integer) => Ok(DataType::U32),
            Token::Keyword(Keyword::Bigint) => Ok(DataType::U64),
            Token::Keyword(Keyword::Smallint) => Ok(DataType::U16),
            Token::Keyword(Keyword::Tinyint) => Ok(DataType::U8),
            Token::Keyword(Keyword::Text) => Ok(DataType::Char32),
            Token::Keyword(Keyword::Float)
            | Token::Keyword(Keyword::Double)
            | Token::Keyword(Keyword::Real) => Ok(DataType::F64),
            Token::Keyword(Keyword::Char) => {
                self.expect(Token::LParen, "'('")?;
                let len = match self.advance() {
                    Token::Int(n) if n > 0 => n as usize,
                    other => bail!("expected a CHAR length, found {other:?}"),
                };
                self.expect(Token::RParen, "')'")?;
                DataType::char_for_len(len)
                    .ok_or_else(|| eyre::eyre!("CHAR({len}) exceeds the maximum width of 255"))
            }
            other => bail!("expected a data type, found {other:?}"),
        }
    }

    fn parse_where_clause(&mut self) -> Result<Option<Expr>> {
        if self.eat_keyword(Keyword::Where) {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_not()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword(Keyword::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::Not {
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_primary()?;
        let op = match self.peek() {
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_primary()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::Ident(name) => Ok(Expr::Column {
                name: name.to_string(),
                sem: None,
            }),
            Token::Int(value) => Ok(Expr::IntLiteral {
                value,
                sem_ty: None,
            }),
            Token::Str(value) => Ok(Expr::StrLiteral {
                value: value.to_string(),
                sem_ty: None,
            }),
            other => bail!("expected an expression, found {other:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(input: &str) -> Statement {
        let mut stmts = parse_sql(input).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.pop().unwrap().stmt
    }

    #[test]
    fn select_star_with_where_and_order() {
        let Statement::Select(select) =
            one("SELECT * FROM users WHERE age > 30 ORDER BY name DESC;")
        else {
            panic!("expected SELECT")
        };
        assert_eq!(select.table, "users");
        assert_eq!(select.projection, Projection::Star);
        assert!(matches!(
            select.where_clause,
            Some(Expr::Binary {
                op: BinaryOp::Gt,
                ..
            })
        ));
        let order = select.order_by.unwrap();
        assert_eq!(order.column, "name");
        assert!(order.desc);
    }

    #[test]
    fn select_column_list() {
        let Statement::Select(select) = one("SELECT username, age FROM users") else {
            panic!("expected SELECT")
        };
        assert_eq!(
            select.projection,
            Projection::Columns(vec!["username".into(), "age".into()])
        );
        assert!(select.where_clause.is_none());
    }

    #[test]
    fn insert_with_values() {
        let Statement::Insert(insert) =
            one("INSERT INTO users (user_id, username) VALUES (1, 'alice');")
        else {
            panic!("expected INSERT")
        };
        assert_eq!(insert.table, "users");
        assert_eq!(insert.columns, vec!["user_id", "username"]);
        assert_eq!(insert.values.len(), 2);
        assert!(matches!(insert.values[0], Expr::IntLiteral { value: 1, .. }));
        assert!(matches!(insert.values[1], Expr::StrLiteral { .. }));
    }

    #[test]
    fn update_with_assignments() {
        let Statement::Update(update) =
            one("UPDATE users SET age = 31, city = 'LA' WHERE user_id = 7")
        else {
            panic!("expected UPDATE")
        };
        assert_eq!(update.assignments.len(), 2);
        assert_eq!(update.assignments[0].0, "age");
        assert!(update.where_clause.is_some());
    }

    #[test]
    fn delete_with_where() {
        let Statement::Delete(delete) = one("DELETE FROM users WHERE age < 18") else {
            panic!("expected DELETE")
        };
        assert_eq!(delete.table, "users");
        assert!(delete.where_clause.is_some());
    }

    #[test]
    fn create_table_types() {
        let Statement::CreateTable(create) =
            one("CREATE TABLE t (id INT, name TEXT, tag CHAR(8), n BIGINT, x FLOAT)")
        else {
            panic!("expected CREATE TABLE")
        };
        assert_eq!(create.table, "t");
        let types: Vec<DataType> = create.columns.iter().map(|(_, t)| *t).collect();
        assert_eq!(
            types,
            vec![
                DataType::U32,
                DataType::Char32,
                DataType::Char16,
                DataType::U64,
                DataType::F64
            ]
        );
    }

    #[test]
    fn transaction_statements() {
        assert_eq!(one("BEGIN;"), Statement::Begin);
        assert_eq!(one("COMMIT;"), Statement::Commit);
        assert_eq!(one("ROLLBACK;"), Statement::Rollback);
    }

    #[test]
    fn multiple_statements_keep_their_source_text() {
        let stmts = parse_sql("BEGIN; INSERT INTO t (a) VALUES (1); COMMIT;").unwrap();
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0].sql, "BEGIN");
        assert_eq!(stmts[1].sql, "INSERT INTO t (a) VALUES (1)");
        assert_eq!(stmts[2].sql, "COMMIT");
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let Statement::Select(select) = one("SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3")
        else {
            panic!("expected SELECT")
        };
        let Some(Expr::Binary {
            op: BinaryOp::Or, right, ..
        }) = select.where_clause
        else {
            panic!("expected OR at the root")
        };
        assert!(matches!(
            *right,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn parentheses_group_expressions() {
        let Statement::Select(select) = one("SELECT * FROM t WHERE (a = 1 OR b = 2) AND c = 3")
        else {
            panic!("expected SELECT")
        };
        let Some(Expr::Binary {
            op: BinaryOp::And, left, ..
        }) = select.where_clause
        else {
            panic!("expected AND at the root")
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(parse_sql("SELECT FROM users").is_err());
        assert!(parse_sql("INSERT users VALUES (1)").is_err());
        assert!(parse_sql("CREATE TABLE t (id CHAR(999))").is_err());
        assert!(parse_sql("SELECT * FROM t WHERE").is_err());
    }
}

//! Cross-module tests: the whole pipeline wired the way the binary wires it.

// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Transforms applied to small hand-made images, checked against their
//! expected shape and then decoded back from a token stream.

use jxl_modular::{
    entropy_coding::{HybridUintConfig, TokenBuffer, write_tokens},
    image::Image,
    modular::{
        ChannelInfo, DecoderLimits, GroupHeader, ModularChannel, ModularImage, ModularOptions,
        PaletteParams, Predictor, SqueezeParams, Transform, Tree, decode_image, encode_channels,
        encode_image, tree::tokenize_tree,
    },
};

type Pixels = Vec<((usize, usize), Vec<i32>)>;

fn pixels(image: &ModularImage) -> Pixels {
    image
        .channels()
        .unwrap()
        .iter()
        .map(|c| (c.size(), c.data.iter().collect()))
        .collect()
}

fn infos(pixels: &Pixels) -> Vec<ChannelInfo> {
    pixels.iter().map(|(size, _)| ChannelInfo::new(*size)).collect()
}

/// Encodes `image` with a learned tree, then decodes it from the recorded
/// tokens into an image with the original channel layout.
fn roundtrip(image: &ModularImage, original: &Pixels) -> Pixels {
    let options = ModularOptions::default();
    let header = options.group_header(0).unwrap();
    let mut buffer = TokenBuffer::new();
    encode_image(image, &header, &options, &mut buffer).unwrap();
    buffer.rewind();
    let limits = DecoderLimits::default();
    let mut decoded = ModularImage::from_transforms(
        &infos(original),
        image.bit_depth(),
        image.transforms().to_vec(),
        &limits,
    )
    .unwrap();
    decode_image(&mut decoded, &header, &limits, &mut buffer).unwrap();
    assert!(buffer.is_exhausted());
    pixels(&decoded)
}

#[test]
fn constant_image_squeezed_both_ways() {
    let data = Image::new_with_value((8, 8), 100).unwrap();
    let mut image = ModularImage::new(vec![ModularChannel::from_image(data)], 8).unwrap();
    let original = pixels(&image);

    let horizontal = SqueezeParams {
        horizontal: true,
        in_place: true,
        begin_c: 0,
        num_c: 1,
    };
    let vertical = SqueezeParams {
        horizontal: false,
        ..horizontal
    };
    assert!(
        image
            .apply_transform(Transform::Squeeze(vec![horizontal, vertical]))
            .unwrap()
    );

    let channels = image.channels().unwrap();
    let sizes: Vec<_> = channels.iter().map(|c| c.size()).collect();
    assert_eq!(sizes, vec![(4, 4), (4, 4), (4, 8)]);
    assert!(channels[0].data.iter().all(|v| v == 100));
    for residuals in &channels[1..] {
        assert!(residuals.data.iter().all(|v| v == 0));
    }

    // A tree that predicts zero everywhere still codes the residual
    // channels as zeros.
    let header = GroupHeader::default();
    let tree = Tree::single_leaf(Predictor::Zero, 0, 1).unwrap();
    let tokens = encode_channels(channels, &header, &tree).unwrap();
    for residuals in &tokens[1..] {
        assert!(residuals.iter().all(|t| t.value == 0));
    }

    let config = HybridUintConfig::default();
    let mut buffer = TokenBuffer::new();
    write_tokens(&mut buffer, &config, &tokenize_tree(&tree));
    for channel_tokens in tokens.iter() {
        write_tokens(&mut buffer, &config, channel_tokens);
    }
    buffer.rewind();

    let limits = DecoderLimits::default();
    let mut decoded = ModularImage::from_transforms(
        &[ChannelInfo::new((8, 8))],
        8,
        image.transforms().to_vec(),
        &limits,
    )
    .unwrap();
    decode_image(&mut decoded, &header, &limits, &mut buffer).unwrap();
    assert!(buffer.is_exhausted());
    assert_eq!(pixels(&decoded), original);
}

#[test]
fn gray_image_has_no_chroma() {
    let gray: Vec<i32> = (0..16).map(|i| (i * 37) % 256).collect();
    let channels = (0..3)
        .map(|_| ModularChannel::from_image(Image::from_vec((4, 4), gray.clone()).unwrap()))
        .collect();
    let mut image = ModularImage::new(channels, 8).unwrap();
    let original = pixels(&image);

    // RGB order, YCoCg.
    assert!(
        image
            .apply_transform(Transform::Rct {
                begin_c: 0,
                rct_type: 6,
            })
            .unwrap()
    );
    let channels = image.channels().unwrap();
    assert_eq!(channels[0].data.iter().collect::<Vec<_>>(), gray);
    for chroma in &channels[1..] {
        assert!(chroma.data.iter().all(|v| v == 0));
    }

    assert_eq!(roundtrip(&image, &original), original);
}

#[test]
fn three_color_palette() {
    let colors = [5, 9, 200];
    let values: Vec<i32> = (0..30).map(|i| colors[(i * 7 + i / 6) % 3]).collect();
    let data = Image::from_vec((6, 5), values.clone()).unwrap();
    let mut image = ModularImage::new(vec![ModularChannel::from_image(data)], 8).unwrap();
    let original = pixels(&image);

    assert!(
        image
            .apply_transform(Transform::Palette(PaletteParams::new(0, 1, 256)))
            .unwrap()
    );
    assert_eq!(image.nb_meta_channels(), 1);
    let channels = image.channels().unwrap();
    assert_eq!(channels.len(), 2);
    let palette = image.channel(0).unwrap();
    assert!(palette.info().is_meta());
    assert_eq!(palette.size(), (3, 1));
    assert_eq!(palette.data.iter().collect::<Vec<_>>(), colors);
    assert_eq!(channels[1].size(), (6, 5));
    for (index, value) in channels[1].data.iter().zip(values) {
        assert!((0..3).contains(&index));
        assert_eq!(colors[index as usize], value);
    }

    assert_eq!(roundtrip(&image, &original), original);
}
